//! Voice activity state machine with confirm-up / confirm-down hysteresis.
//!
//! ```text
//!            score ≥ thr                      held ≥ speech_confirm
//! Silence ─────────────► SpeechCandidate ────────────────────────► SpeechConfirmed
//!    ▲                        │ score < thr                          │  ▲
//!    │                        ▼ (blip, dropped)          score < thr │  │ score ≥ thr
//!    │◄───────────────────────┘                                      ▼  │
//!    └──────────────────────────────────────────────────────── SilenceCandidate
//!                  held ≥ silence_threshold → END
//! ```
//!
//! START is reported at the provisional onset, END at the provisional
//! silence start, so boundaries mark real speech edges rather than the
//! moment detection caught up.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::analysis::FrameScore;
use crate::audio::{ms_to_samples, samples_to_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    Start,
    End,
}

/// A speech edge in the source timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentBoundary {
    pub kind: BoundaryKind,
    pub sample_offset: u64,
    pub source_timestamp_ms: u64,
}

impl SegmentBoundary {
    pub fn new(kind: BoundaryKind, sample_offset: u64, sample_rate: u32) -> Self {
        Self {
            kind,
            sample_offset,
            source_timestamp_ms: samples_to_ms(sample_offset, sample_rate),
        }
    }
}

/// Current hysteresis state. Offsets are sample positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    SpeechCandidate { onset: u64 },
    SpeechConfirmed { onset: u64 },
    SilenceCandidate { onset: u64, silence_start: u64 },
}

/// Timing parameters for the hysteresis windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadTiming {
    pub sample_rate: u32,
    /// Speech must hold this long before START is emitted. Default: 90 ms.
    pub speech_confirm_ms: u32,
    /// Silence must hold this long before END is emitted. Default: 700 ms.
    pub silence_threshold_ms: u32,
}

impl Default for VadTiming {
    fn default() -> Self {
        Self {
            sample_rate: crate::audio::TARGET_SAMPLE_RATE,
            speech_confirm_ms: 90,
            silence_threshold_ms: 700,
        }
    }
}

/// Frame-driven VAD state machine. Feed it scores in stream order.
#[derive(Debug, Clone)]
pub struct VadMachine {
    timing: VadTiming,
    confirm_samples: u64,
    silence_samples: u64,
    state: VadState,
}

impl VadMachine {
    pub fn new(timing: VadTiming) -> Self {
        Self {
            confirm_samples: ms_to_samples(u64::from(timing.speech_confirm_ms), timing.sample_rate),
            silence_samples: ms_to_samples(
                u64::from(timing.silence_threshold_ms),
                timing.sample_rate,
            )
            .max(1),
            timing,
            state: VadState::Silence,
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// `true` once speech has been confirmed and not yet closed.
    pub fn in_speech(&self) -> bool {
        matches!(
            self.state,
            VadState::SpeechConfirmed { .. } | VadState::SilenceCandidate { .. }
        )
    }

    pub fn reset(&mut self) {
        self.state = VadState::Silence;
    }

    fn boundary(&self, kind: BoundaryKind, offset: u64) -> SegmentBoundary {
        SegmentBoundary::new(kind, offset, self.timing.sample_rate)
    }

    /// Advance by one frame; returns a boundary when one is confirmed.
    pub fn push(&mut self, frame: &FrameScore) -> Option<SegmentBoundary> {
        let end = frame.end_sample();
        let speech = frame.is_speech_candidate;

        let (next, emitted) = match (self.state, speech) {
            (VadState::Silence, false) => (VadState::Silence, None),
            (VadState::Silence, true) => {
                let onset = frame.start_sample;
                self.confirm_or_wait(onset, end)
            }
            (VadState::SpeechCandidate { onset }, true) => self.confirm_or_wait(onset, end),
            (VadState::SpeechCandidate { onset }, false) => {
                trace!(onset, "speech blip discarded");
                (VadState::Silence, None)
            }
            (VadState::SpeechConfirmed { onset }, true) => {
                (VadState::SpeechConfirmed { onset }, None)
            }
            (VadState::SpeechConfirmed { onset }, false) => {
                self.close_or_wait(onset, frame.start_sample, end)
            }
            (VadState::SilenceCandidate { onset, .. }, true) => {
                (VadState::SpeechConfirmed { onset }, None)
            }
            (VadState::SilenceCandidate { onset, silence_start }, false) => {
                self.close_or_wait(onset, silence_start, end)
            }
        };

        self.state = next;
        emitted
    }

    fn confirm_or_wait(&self, onset: u64, now: u64) -> (VadState, Option<SegmentBoundary>) {
        if now - onset >= self.confirm_samples {
            (
                VadState::SpeechConfirmed { onset },
                Some(self.boundary(BoundaryKind::Start, onset)),
            )
        } else {
            (VadState::SpeechCandidate { onset }, None)
        }
    }

    fn close_or_wait(
        &self,
        onset: u64,
        silence_start: u64,
        now: u64,
    ) -> (VadState, Option<SegmentBoundary>) {
        if now - silence_start >= self.silence_samples {
            (
                VadState::Silence,
                Some(self.boundary(BoundaryKind::End, silence_start)),
            )
        } else {
            (VadState::SilenceCandidate { onset, silence_start }, None)
        }
    }

    /// Close the stream at `end_sample`.
    ///
    /// Open speech is closed at end-of-stream; a pending silence candidate
    /// closes at its provisional silence start; an unconfirmed candidate is
    /// dropped.
    pub fn finish(&mut self, end_sample: u64) -> Option<SegmentBoundary> {
        let emitted = match self.state {
            VadState::SpeechConfirmed { .. } => {
                Some(self.boundary(BoundaryKind::End, end_sample))
            }
            VadState::SilenceCandidate { silence_start, .. } => {
                Some(self.boundary(BoundaryKind::End, silence_start))
            }
            VadState::Silence | VadState::SpeechCandidate { .. } => None,
        };
        self.state = VadState::Silence;
        emitted
    }
}

/// Adapts a `FrameScore` iterator into a lazy boundary iterator, closing
/// trailing speech when the input runs out.
pub struct BoundaryStream<I> {
    frames: I,
    machine: VadMachine,
    last_end: u64,
    finished: bool,
}

impl<I: Iterator<Item = FrameScore>> BoundaryStream<I> {
    pub fn new(frames: I, timing: VadTiming) -> Self {
        Self {
            frames,
            machine: VadMachine::new(timing),
            last_end: 0,
            finished: false,
        }
    }
}

impl<I: Iterator<Item = FrameScore>> Iterator for BoundaryStream<I> {
    type Item = SegmentBoundary;

    fn next(&mut self) -> Option<SegmentBoundary> {
        if self.finished {
            return None;
        }
        for frame in self.frames.by_ref() {
            self.last_end = frame.end_sample();
            if let Some(b) = self.machine.push(&frame) {
                return Some(b);
            }
        }
        self.finished = true;
        self.machine.finish(self.last_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: u32 = 480; // 30 ms at 16 kHz

    /// One FrameScore per char: `#` speech, `.` silence.
    fn frames(pattern: &str) -> Vec<FrameScore> {
        pattern
            .chars()
            .enumerate()
            .map(|(i, c)| FrameScore {
                frame_index: i as u64,
                start_sample: i as u64 * u64::from(FRAME),
                sample_count: FRAME,
                is_speech_candidate: c == '#',
                score: if c == '#' { 1.0 } else { 0.0 },
            })
            .collect()
    }

    fn timing(confirm_ms: u32, silence_ms: u32) -> VadTiming {
        VadTiming {
            sample_rate: 16_000,
            speech_confirm_ms: confirm_ms,
            silence_threshold_ms: silence_ms,
        }
    }

    fn run(pattern: &str, t: VadTiming) -> Vec<SegmentBoundary> {
        BoundaryStream::new(frames(pattern).into_iter(), t).collect()
    }

    #[test]
    fn empty_stream_has_no_boundaries() {
        assert!(run("", timing(90, 300)).is_empty());
        assert!(run("..........", timing(90, 300)).is_empty());
    }

    #[test]
    fn start_reported_at_onset_not_confirmation() {
        // speech from frame 2; confirmation after 3 frames (90 ms)
        let b = run("..######..........", timing(90, 300));
        assert_eq!(b[0].kind, BoundaryKind::Start);
        assert_eq!(b[0].sample_offset, 2 * 480);
        assert_eq!(b[0].source_timestamp_ms, 60);
        assert_eq!(b[1].kind, BoundaryKind::End);
        assert_eq!(b[1].sample_offset, 8 * 480);
    }

    #[test]
    fn short_blip_is_discarded() {
        let b = run("..##..........", timing(90, 300));
        assert!(b.is_empty(), "{b:?}");
    }

    #[test]
    fn short_dip_inside_speech_does_not_split() {
        // 2-frame dip (60 ms) is below the 300 ms silence confirmation.
        let b = run("######..######..........", timing(90, 300));
        assert_eq!(b.len(), 2);
        assert_eq!(b[0].sample_offset, 0);
        assert_eq!(b[1].sample_offset, 14 * 480);
    }

    #[test]
    fn long_gap_splits_into_two_utterances() {
        let b = run("######..........######..........", timing(90, 300));
        let kinds: Vec<_> = b.iter().map(|x| x.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BoundaryKind::Start,
                BoundaryKind::End,
                BoundaryKind::Start,
                BoundaryKind::End
            ]
        );
        assert_eq!(b[2].sample_offset, 16 * 480);
    }

    #[test]
    fn trailing_speech_closed_at_end_of_stream() {
        let b = run("....######", timing(90, 300));
        assert_eq!(b.len(), 2);
        assert_eq!(b[1].kind, BoundaryKind::End);
        assert_eq!(b[1].sample_offset, 10 * 480);
    }

    #[test]
    fn trailing_silence_candidate_closed_at_silence_start() {
        let b = run("######...", timing(90, 300));
        assert_eq!(b.len(), 2);
        assert_eq!(b[1].sample_offset, 6 * 480);
    }

    #[test]
    fn unconfirmed_trailing_candidate_dropped() {
        let b = run("......##", timing(90, 300));
        assert!(b.is_empty());
    }

    #[test]
    fn machine_reports_speech_state() {
        let mut m = VadMachine::new(timing(30, 300));
        let f = frames("#");
        assert!(m.push(&f[0]).is_some());
        assert!(m.in_speech());
        m.reset();
        assert_eq!(m.state(), VadState::Silence);
    }
}
