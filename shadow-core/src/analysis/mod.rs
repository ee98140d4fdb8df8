//! Frame analysis: PCM stream → fixed-size frames → per-frame speech scores.
//!
//! The `FrameScorer` trait is the extension point: `EnergyScorer` (default)
//! and `SileroScorer` (feature `onnx`) are interchangeable. Scorers see one
//! frame at a time, so the analyzer never needs the whole stream in memory.

pub mod energy;

#[cfg(feature = "onnx")]
pub mod silero;

pub use energy::EnergyScorer;

#[cfg(feature = "onnx")]
pub use silero::SileroScorer;

use serde::{Deserialize, Serialize};

use crate::audio::ms_to_samples;
use crate::buffering::frame::AudioFrame;

/// Lower/upper bounds for the speech threshold derived from a sensitivity.
const MIN_THRESHOLD: f32 = 0.05;
const MAX_THRESHOLD: f32 = 0.95;

/// Scores one frame of audio with a speech likelihood in `[0, 1]`.
///
/// Implementors may be stateful (adaptive noise floors, RNN hidden states)
/// but must be deterministic: the same frames in the same order after
/// `reset` yield the same scores.
pub trait FrameScorer: Send {
    fn score(&mut self, frame: &AudioFrame) -> f32;

    /// Reset any internal state before scoring a new stream.
    fn reset(&mut self);

    fn name(&self) -> &'static str {
        "unknown"
    }
}

impl<T: FrameScorer + ?Sized> FrameScorer for Box<T> {
    fn score(&mut self, frame: &AudioFrame) -> f32 {
        (**self).score(frame)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<T: FrameScorer + ?Sized> FrameScorer for &mut T {
    fn score(&mut self, frame: &AudioFrame) -> f32 {
        (**self).score(frame)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Per-frame analysis result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameScore {
    pub frame_index: u64,
    pub start_sample: u64,
    pub sample_count: u32,
    pub is_speech_candidate: bool,
    /// Energy or model confidence in `[0, 1]`.
    pub score: f32,
}

impl FrameScore {
    pub fn end_sample(&self) -> u64 {
        self.start_sample + u64::from(self.sample_count)
    }
}

/// Map a VAD sensitivity in `[0, 1]` to a speech threshold on frame scores.
/// Higher sensitivity → lower threshold → more frames count as speech.
pub fn threshold_for_sensitivity(sensitivity: f32) -> f32 {
    (1.0 - sensitivity).clamp(MIN_THRESHOLD, MAX_THRESHOLD)
}

/// Lazily splits a sample iterator into frames and scores each one.
///
/// Holds at most one frame of samples. The trailing partial frame is scored
/// as well, so the last `FrameScore::end_sample` equals the stream length.
pub struct FrameAnalyzer<I, S> {
    samples: I,
    scorer: S,
    frame_samples: usize,
    threshold: f32,
    next_index: u64,
    next_start: u64,
    exhausted: bool,
}

impl<I, S> FrameAnalyzer<I, S>
where
    I: Iterator<Item = i16>,
    S: FrameScorer,
{
    /// # Parameters
    /// - `frame_ms`: frame duration; 30 ms at 16 kHz is 480 samples.
    /// - `threshold`: score at or above which a frame is a speech candidate.
    pub fn new(
        samples: impl IntoIterator<IntoIter = I>,
        mut scorer: S,
        frame_ms: u32,
        sample_rate: u32,
        threshold: f32,
    ) -> Self {
        scorer.reset();
        Self {
            samples: samples.into_iter(),
            scorer,
            frame_samples: (ms_to_samples(u64::from(frame_ms), sample_rate) as usize).max(1),
            threshold,
            next_index: 0,
            next_start: 0,
            exhausted: false,
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Offset one past the last sample consumed so far.
    pub fn samples_consumed(&self) -> u64 {
        self.next_start
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }
}

impl<I, S> Iterator for FrameAnalyzer<I, S>
where
    I: Iterator<Item = i16>,
    S: FrameScorer,
{
    type Item = FrameScore;

    fn next(&mut self) -> Option<FrameScore> {
        if self.exhausted {
            return None;
        }

        let mut buf = Vec::with_capacity(self.frame_samples);
        buf.extend(self.samples.by_ref().take(self.frame_samples));
        if buf.len() < self.frame_samples {
            self.exhausted = true;
        }
        if buf.is_empty() {
            return None;
        }

        let frame = AudioFrame::new(self.next_index, self.next_start, buf);
        let score = self.scorer.score(&frame).clamp(0.0, 1.0);

        self.next_index += 1;
        self.next_start = frame.end_sample();

        Some(FrameScore {
            frame_index: frame.index,
            start_sample: frame.start_sample,
            sample_count: frame.samples.len() as u32,
            is_speech_candidate: score >= self.threshold,
            score,
        })
    }
}

/// Convenience constructor matching the analyzer contract:
/// `analyze(pcm, frame_ms, sample_rate)` with the default energy scorer and
/// a mid-range threshold.
pub fn analyze<P>(
    pcm: P,
    frame_ms: u32,
    sample_rate: u32,
) -> FrameAnalyzer<P::IntoIter, EnergyScorer>
where
    P: IntoIterator<Item = i16>,
{
    FrameAnalyzer::new(
        pcm,
        EnergyScorer::default(),
        frame_ms,
        sample_rate,
        threshold_for_sensitivity(0.5),
    )
}

/// Compact per-frame score history for one source, used to find low-energy
/// cut points when splitting long spans. One float per frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergyProfile {
    frame_samples: usize,
    sample_rate: u32,
    scores: Vec<f32>,
}

impl EnergyProfile {
    pub fn new(frame_samples: usize, sample_rate: u32) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            sample_rate,
            scores: Vec::new(),
        }
    }

    pub fn push(&mut self, score: &FrameScore) {
        self.scores.push(score.score);
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    fn frame_ms(&self) -> f64 {
        self.frame_samples as f64 * 1000.0 / self.sample_rate.max(1) as f64
    }

    /// `(frame_centre_ms, score)` for every frame whose centre lies in
    /// `[start_ms, end_ms]`.
    pub fn frames_between(&self, start_ms: u64, end_ms: u64) -> Vec<(u64, f32)> {
        if self.scores.is_empty() || end_ms < start_ms {
            return Vec::new();
        }
        let frame_ms = self.frame_ms();
        self.scores
            .iter()
            .enumerate()
            .filter_map(|(i, &s)| {
                let centre = ((i as f64 + 0.5) * frame_ms).round() as u64;
                (centre >= start_ms && centre <= end_ms).then_some((centre, s))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstantScorer(f32);

    impl FrameScorer for ConstantScorer {
        fn score(&mut self, _frame: &AudioFrame) -> f32 {
            self.0
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn empty_input_yields_no_frames() {
        let scores: Vec<_> = analyze(Vec::<i16>::new(), 30, 16_000).collect();
        assert!(scores.is_empty());
    }

    #[test]
    fn trailing_partial_frame_is_scored() {
        let pcm = vec![0i16; 480 * 2 + 100];
        let scores: Vec<_> =
            FrameAnalyzer::new(pcm, ConstantScorer(0.9), 30, 16_000, 0.5).collect();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[2].start_sample, 960);
        assert_eq!(scores[2].sample_count, 100);
        assert_eq!(scores[2].end_sample(), 1060);
        assert!(scores.iter().all(|s| s.is_speech_candidate));
    }

    #[test]
    fn threshold_marks_candidates() {
        let pcm = vec![0i16; 480];
        let below: Vec<_> =
            FrameAnalyzer::new(pcm.clone(), ConstantScorer(0.4), 30, 16_000, 0.5).collect();
        let at: Vec<_> = FrameAnalyzer::new(pcm, ConstantScorer(0.5), 30, 16_000, 0.5).collect();
        assert!(!below[0].is_speech_candidate);
        assert!(at[0].is_speech_candidate);
    }

    #[test]
    fn sensitivity_maps_inversely_to_threshold() {
        assert!(threshold_for_sensitivity(0.8) < threshold_for_sensitivity(0.2));
        assert_eq!(threshold_for_sensitivity(1.5), MIN_THRESHOLD);
        assert_eq!(threshold_for_sensitivity(-1.0), MAX_THRESHOLD);
    }

    #[test]
    fn profile_reports_frame_centres_in_window() {
        let mut profile = EnergyProfile::new(480, 16_000);
        for (i, s) in [0.1f32, 0.2, 0.3, 0.4].iter().enumerate() {
            profile.push(&FrameScore {
                frame_index: i as u64,
                start_sample: i as u64 * 480,
                sample_count: 480,
                is_speech_candidate: false,
                score: *s,
            });
        }
        // centres at 15, 45, 75, 105 ms
        let frames = profile.frames_between(40, 80);
        assert_eq!(frames, vec![(45, 0.2), (75, 0.3)]);
    }
}
