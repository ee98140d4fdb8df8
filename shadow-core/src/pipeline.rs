//! Segmentation pipeline: PCM → frame scores → boundaries → segments.
//!
//! ## Stages
//!
//! ```text
//! 1. FrameAnalyzer: fixed-size frames scored by a FrameScorer
//! 2. BoundaryStream: VadMachine hysteresis → START/END boundaries
//! 3. Segmenter: pair, pad, merge, split (WORD mode), order
//! ```
//!
//! Every stage is lazy; memory use is one frame plus the boundary list
//! (and one float per frame in WORD mode, for cut placement). Jobs share no
//! mutable state, so independent imports may run concurrently.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tracing::{debug, info, info_span};

use crate::{
    analysis::{threshold_for_sensitivity, EnergyProfile, EnergyScorer, FrameAnalyzer, FrameScorer},
    audio::{samples_to_ms, AudioSource, PcmBuffer},
    error::{Result, ShadowError},
    segment::{SegmentationMode, Segmentation, SegmentationPolicy, Segmenter},
    vad::{BoundaryKind, BoundaryStream},
};

/// Per-job counters.
#[derive(Debug, Default)]
pub struct PipelineDiagnostics {
    pub frames_scored: AtomicUsize,
    pub speech_frames: AtomicUsize,
    pub boundaries: AtomicUsize,
    pub spans_merged: AtomicUsize,
    pub spans_dropped: AtomicUsize,
    pub spans_split: AtomicUsize,
    pub segments_emitted: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.frames_scored.store(0, Ordering::Relaxed);
        self.speech_frames.store(0, Ordering::Relaxed);
        self.boundaries.store(0, Ordering::Relaxed);
        self.spans_merged.store(0, Ordering::Relaxed);
        self.spans_dropped.store(0, Ordering::Relaxed);
        self.spans_split.store(0, Ordering::Relaxed);
        self.segments_emitted.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_scored: self.frames_scored.load(Ordering::Relaxed),
            speech_frames: self.speech_frames.load(Ordering::Relaxed),
            boundaries: self.boundaries.load(Ordering::Relaxed),
            spans_merged: self.spans_merged.load(Ordering::Relaxed),
            spans_dropped: self.spans_dropped.load(Ordering::Relaxed),
            spans_split: self.spans_split.load(Ordering::Relaxed),
            segments_emitted: self.segments_emitted.load(Ordering::Relaxed),
        }
    }

    fn record(&self, seg: &Segmentation) {
        self.spans_merged.fetch_add(seg.stats.merged, Ordering::Relaxed);
        self.spans_dropped.fetch_add(seg.stats.dropped, Ordering::Relaxed);
        self.spans_split.fetch_add(seg.stats.split_added, Ordering::Relaxed);
        self.segments_emitted.fetch_add(seg.len(), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_scored: usize,
    pub speech_frames: usize,
    pub boundaries: usize,
    pub spans_merged: usize,
    pub spans_dropped: usize,
    pub spans_split: usize,
    pub segments_emitted: usize,
}

/// Output of a background segmentation job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub segmentation: Segmentation,
    pub diagnostics: DiagnosticsSnapshot,
    pub scorer: &'static str,
}

/// Segment an in-memory buffer with the energy scorer.
///
/// An empty result is returned as `Ok`; use [`Segmentation::into_result`]
/// to turn it into `ShadowError::NoSpeechDetected`.
pub fn segment_pcm(
    samples: &[i16],
    sample_rate: u32,
    policy: &SegmentationPolicy,
) -> Result<Segmentation> {
    check_rate(sample_rate, policy)?;
    let diagnostics = PipelineDiagnostics::default();
    let duration_ms = samples_to_ms(samples.len() as u64, sample_rate);
    Ok(run(
        samples.iter().copied(),
        duration_ms,
        policy,
        EnergyScorer::default(),
        &diagnostics,
    ))
}

/// Stream a source through the pipeline with any scorer.
///
/// # Errors
/// `ShadowError::SampleRateMismatch` when the source rate differs from the
/// policy's rate; resampling belongs upstream.
pub fn segment_source<S: FrameScorer>(
    source: &dyn AudioSource,
    policy: &SegmentationPolicy,
    scorer: S,
    diagnostics: &PipelineDiagnostics,
) -> Result<Segmentation> {
    check_rate(source.sample_rate(), policy)?;
    Ok(run(
        source.pcm(),
        source.duration_ms(),
        policy,
        scorer,
        diagnostics,
    ))
}

/// Run [`segment_source`] on the blocking pool.
pub async fn segment_in_background<A, S>(
    source: A,
    policy: SegmentationPolicy,
    scorer: S,
) -> Result<JobOutcome>
where
    A: AudioSource + 'static,
    S: FrameScorer + 'static,
{
    tokio::task::spawn_blocking(move || {
        let diagnostics = PipelineDiagnostics::default();
        let name = scorer.name();
        let segmentation = segment_source(&source, &policy, scorer, &diagnostics)?;
        Ok(JobOutcome {
            segmentation,
            diagnostics: diagnostics.snapshot(),
            scorer: name,
        })
    })
    .await
    .map_err(|e| ShadowError::Other(anyhow::anyhow!("segmentation task failed: {e}")))?
}

/// Convenience for owned sample vectors.
pub async fn segment_buffer_in_background(
    buffer: PcmBuffer,
    policy: SegmentationPolicy,
) -> Result<JobOutcome> {
    segment_in_background(buffer, policy, EnergyScorer::default()).await
}

fn check_rate(actual: u32, policy: &SegmentationPolicy) -> Result<()> {
    if actual == policy.sample_rate() {
        Ok(())
    } else {
        Err(ShadowError::SampleRateMismatch {
            expected: policy.sample_rate(),
            actual,
        })
    }
}

fn run<I, S>(
    samples: I,
    duration_ms: u64,
    policy: &SegmentationPolicy,
    scorer: S,
    diagnostics: &PipelineDiagnostics,
) -> Segmentation
where
    I: Iterator<Item = i16>,
    S: FrameScorer,
{
    let span = info_span!(
        "segmentation",
        duration_ms,
        mode = ?policy.mode(),
        scorer = scorer.name()
    );
    let _enter = span.enter();

    let analyzer = FrameAnalyzer::new(
        samples,
        scorer,
        policy.frame_ms(),
        policy.sample_rate(),
        threshold_for_sensitivity(policy.vad_sensitivity()),
    );
    let keep_profile = policy.mode() == SegmentationMode::Word;
    let mut profile = EnergyProfile::new(analyzer.frame_samples(), policy.sample_rate());

    let frames = analyzer.inspect(|f| {
        diagnostics.frames_scored.fetch_add(1, Ordering::Relaxed);
        if f.is_speech_candidate {
            diagnostics.speech_frames.fetch_add(1, Ordering::Relaxed);
        }
        if keep_profile {
            profile.push(f);
        }
    });
    let boundaries: Vec<_> = BoundaryStream::new(frames, policy.vad_timing()).collect();
    diagnostics
        .boundaries
        .fetch_add(boundaries.len(), Ordering::Relaxed);
    debug!(
        starts = boundaries.iter().filter(|b| b.kind == BoundaryKind::Start).count(),
        total = boundaries.len(),
        "boundaries detected"
    );

    let mut segmenter = Segmenter::new(policy, duration_ms);
    if keep_profile {
        segmenter = segmenter.with_energy(&profile);
    }
    let segmentation = segmenter.segment(boundaries);
    diagnostics.record(&segmentation);

    info!(
        segments = segmentation.len(),
        raw_spans = segmentation.stats.raw_spans,
        dropped = segmentation.stats.dropped,
        "segmentation complete"
    );
    segmentation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Preset;

    fn tone(ms: u64) -> Vec<i16> {
        (0..ms * 16)
            .map(|i| ((i as f32 * 0.2).sin() * 12_000.0) as i16)
            .collect()
    }

    fn silence(ms: u64) -> Vec<i16> {
        vec![0; (ms * 16) as usize]
    }

    #[test]
    fn silence_only_is_empty() {
        let pcm = silence(3_000);
        let seg = segment_pcm(&pcm, 16_000, &SegmentationPolicy::default()).unwrap();
        assert!(seg.is_empty());
    }

    #[test]
    fn rejects_wrong_rate() {
        let err = segment_pcm(&[0; 100], 44_100, &SegmentationPolicy::default()).unwrap_err();
        assert!(matches!(err, ShadowError::SampleRateMismatch { .. }));
    }

    #[test]
    fn diagnostics_count_frames_and_segments() {
        let mut pcm = silence(1_000);
        pcm.extend(tone(1_500));
        pcm.extend(silence(1_500));
        let source = PcmBuffer::new(pcm, 16_000);
        let diag = PipelineDiagnostics::default();
        let policy = SegmentationPolicy::preset(Preset::Sentences);
        let seg = segment_source(&source, &policy, EnergyScorer::default(), &diag).unwrap();
        let snap = diag.snapshot();
        assert_eq!(seg.len(), 1);
        assert_eq!(snap.frames_scored, 134); // 4000 ms / 30 ms, rounded up
        assert_eq!(snap.boundaries, 2);
        assert_eq!(snap.segments_emitted, 1);
        diag.reset();
        assert_eq!(diag.snapshot(), DiagnosticsSnapshot::default());
    }

    #[tokio::test]
    async fn background_job_matches_inline_run() {
        let mut pcm = silence(500);
        pcm.extend(tone(1_000));
        pcm.extend(silence(1_000));
        let policy = SegmentationPolicy::default();
        let inline = segment_pcm(&pcm, 16_000, &policy).unwrap();
        let job = segment_buffer_in_background(PcmBuffer::new(pcm, 16_000), policy)
            .await
            .unwrap();
        assert_eq!(job.segmentation.boundaries(), inline.boundaries());
        assert_eq!(job.scorer, "energy");
    }
}
