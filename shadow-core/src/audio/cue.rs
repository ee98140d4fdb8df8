//! Audible cues that frame each practice step.
//!
//! | Cue          | Tone                        |
//! |--------------|-----------------------------|
//! | `Playback`   | 880 Hz, 150 ms              |
//! | `YourTurn`   | 1047 Hz ×2, 100 ms gap      |
//! | `SegmentDone`| 660 Hz, 150 ms              |
//!
//! Tones carry a 10 % linear fade in/out so they do not click.

use serde::{Deserialize, Serialize};

use super::{ms_to_samples, TARGET_SAMPLE_RATE};

const TONE_MS: u64 = 150;
const DOUBLE_GAP_MS: u64 = 100;
const FADE_FRACTION: f32 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CueKind {
    /// A model utterance is about to play.
    Playback,
    /// The learner should repeat now.
    YourTurn,
    /// The current segment is finished.
    SegmentDone,
}

impl CueKind {
    pub fn frequency_hz(self) -> f32 {
        match self {
            CueKind::Playback => 880.0,
            CueKind::YourTurn => 1047.0,
            CueKind::SegmentDone => 660.0,
        }
    }
}

/// Synthesise a cue as 16-bit PCM at the target rate. `volume` is in `[0, 1]`.
pub fn render(kind: CueKind, volume: f32) -> Vec<i16> {
    let tone = tone(kind.frequency_hz(), TONE_MS, volume.clamp(0.0, 1.0));
    match kind {
        CueKind::YourTurn => {
            let gap = ms_to_samples(DOUBLE_GAP_MS, TARGET_SAMPLE_RATE) as usize;
            let mut out = Vec::with_capacity(tone.len() * 2 + gap);
            out.extend_from_slice(&tone);
            out.resize(out.len() + gap, 0);
            out.extend_from_slice(&tone);
            out
        }
        CueKind::Playback | CueKind::SegmentDone => tone,
    }
}

/// `duration_ms` of digital silence at the target rate.
pub fn silence(duration_ms: u64) -> Vec<i16> {
    vec![0; ms_to_samples(duration_ms, TARGET_SAMPLE_RATE) as usize]
}

fn tone(frequency: f32, duration_ms: u64, volume: f32) -> Vec<i16> {
    let n = ms_to_samples(duration_ms, TARGET_SAMPLE_RATE) as usize;
    let fade = ((n as f32 * FADE_FRACTION) as usize).max(1);
    let rate = TARGET_SAMPLE_RATE as f32;

    (0..n)
        .map(|i| {
            let t = i as f32 / rate;
            let mut v = (2.0 * std::f32::consts::PI * frequency * t).sin();
            if i < fade {
                v *= i as f32 / fade as f32;
            } else if i > n - fade {
                v *= (n - i) as f32 / fade as f32;
            }
            (v * volume * 32_767.0) as i16
        })
        .collect()
}
