//! Segmenter: VAD boundaries → ordered practice segments.
//!
//! ## Steps
//!
//! ```text
//! 1. Pair START/END boundaries into raw spans
//! 2. Pad each span by `padding_ms`, clipped to the source; overlapping
//!    paddings meet halfway between the two raw spans
//! 3. Merge spans shorter than `min` into the next span (the previous one
//!    for the last span) unless the result would exceed `max`, in which case
//!    the short span is dropped with a warning
//! 4. WORD mode only: split spans longer than `max` near low-energy points
//! 5. Number the result from 0 (`order_index`)
//! ```
//!
//! The segmenter is a pure function of (boundaries, policy, duration,
//! energy profile): the same input always produces the same drafts.

pub mod align;
pub mod policy;
mod split;

pub use align::{align_caption_tracks, align_captions, parse_srt, Caption, CaptionTrack};
pub use policy::{PolicyBuilder, Preset, SegmentationMode, SegmentationPolicy};
pub use split::SEARCH_WINDOW_MS;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::EnergyProfile;
use crate::error::{Result, ShadowError};
use crate::vad::{BoundaryKind, SegmentBoundary};

// ---------------------------------------------------------------------------
// Durable segment model
// ---------------------------------------------------------------------------

/// Durable segment identifier, assigned by the segment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg-{}", self.0)
    }
}

/// Identifier of the imported or captured audio a segment was cut from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceAudioId(pub String);

/// Identifier of the playlist that owns a set of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistId(pub String);

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlaylistId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for SourceAudioId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque handle to a segment's audio bytes, owned by storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadRef(pub String);

/// One practice utterance.
///
/// Boundaries are fixed once created. `practice_count` is written by the
/// practice session; `transcription`/`translation` by outside editors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: SegmentId,
    pub source_audio_id: SourceAudioId,
    pub playlist_id: PlaylistId,
    pub start_ms: u64,
    pub end_ms: u64,
    pub order_index: u32,
    pub audio_payload_ref: Option<PayloadRef>,
    pub practice_count: u32,
    pub transcription: Option<String>,
    pub translation: Option<String>,
}

impl Segment {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

// ---------------------------------------------------------------------------
// Segmenter output
// ---------------------------------------------------------------------------

/// A segment before storage has given it an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentDraft {
    pub order_index: u32,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl SegmentDraft {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// Non-fatal events raised while segmenting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SegmentationWarning {
    /// A span below the minimum could not be merged without exceeding the maximum.
    DroppedShortSpan { start_ms: u64, end_ms: u64 },
    /// A span below the minimum had no neighbour to merge into.
    DroppedIsolatedSpan { start_ms: u64, end_ms: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationStats {
    pub raw_spans: usize,
    pub merged: usize,
    pub dropped: usize,
    /// Extra pieces created by word-mode splitting.
    pub split_added: usize,
}

/// Result of one segmentation run. May be empty; see [`Segmentation::into_result`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segmentation {
    pub segments: Vec<SegmentDraft>,
    pub warnings: Vec<SegmentationWarning>,
    pub stats: SegmentationStats,
}

impl Segmentation {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Turn an empty result into `ShadowError::NoSpeechDetected`.
    pub fn into_result(self) -> Result<Self> {
        if self.segments.is_empty() {
            Err(ShadowError::NoSpeechDetected {
                raw_spans: self.stats.raw_spans,
                dropped: self.stats.dropped,
            })
        } else {
            Ok(self)
        }
    }

    /// `(start_ms, end_ms)` pairs, for comparing two runs.
    pub fn boundaries(&self) -> Vec<(u64, u64)> {
        self.segments.iter().map(|s| (s.start_ms, s.end_ms)).collect()
    }
}

// ---------------------------------------------------------------------------
// Segmenter
// ---------------------------------------------------------------------------

/// Half-open millisecond interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Span {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn len(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// Converts a boundary stream into segment drafts under one policy.
#[derive(Debug, Clone)]
pub struct Segmenter<'a> {
    policy: &'a SegmentationPolicy,
    source_duration_ms: u64,
    energy: Option<&'a EnergyProfile>,
}

impl<'a> Segmenter<'a> {
    pub fn new(policy: &'a SegmentationPolicy, source_duration_ms: u64) -> Self {
        Self {
            policy,
            source_duration_ms,
            energy: None,
        }
    }

    /// Frame scores used to place word-mode cuts at quiet points.
    pub fn with_energy(mut self, profile: &'a EnergyProfile) -> Self {
        self.energy = Some(profile);
        self
    }

    pub fn segment(&self, boundaries: impl IntoIterator<Item = SegmentBoundary>) -> Segmentation {
        let mut stats = SegmentationStats::default();
        let mut warnings = Vec::new();

        let raw = self.pair(boundaries);
        stats.raw_spans = raw.len();

        let padded = self.pad(&raw);
        let merged = self.merge_short(padded, &mut stats, &mut warnings);
        let spans = match self.policy.mode() {
            SegmentationMode::Sentence => merged,
            SegmentationMode::Word => self.split_long(merged, &mut stats),
        };

        let segments: Vec<SegmentDraft> = spans
            .into_iter()
            .enumerate()
            .map(|(i, s)| SegmentDraft {
                order_index: i as u32,
                start_ms: s.start_ms,
                end_ms: s.end_ms,
            })
            .collect();

        debug!(
            raw = stats.raw_spans,
            merged = stats.merged,
            dropped = stats.dropped,
            split_added = stats.split_added,
            segments = segments.len(),
            "segmentation finished"
        );

        Segmentation {
            segments,
            warnings,
            stats,
        }
    }

    /// Step 1. Unmatched START closes at end of source; stray ENDs are ignored.
    fn pair(&self, boundaries: impl IntoIterator<Item = SegmentBoundary>) -> Vec<Span> {
        let duration = self.source_duration_ms;
        let mut spans = Vec::new();
        let mut open: Option<u64> = None;

        for b in boundaries {
            match (b.kind, open) {
                (BoundaryKind::Start, None) => open = Some(b.source_timestamp_ms),
                (BoundaryKind::End, Some(start)) => {
                    let end = b.source_timestamp_ms.min(duration);
                    if end > start {
                        spans.push(Span::new(start, end));
                    }
                    open = None;
                }
                (BoundaryKind::Start, Some(_)) | (BoundaryKind::End, None) => {
                    debug!(?b, "ignoring unpaired boundary");
                }
            }
        }
        if let Some(start) = open {
            if duration > start {
                spans.push(Span::new(start, duration));
            }
        }
        spans
    }

    /// Step 2.
    fn pad(&self, raw: &[Span]) -> Vec<Span> {
        let pad = self.policy.padding_ms();
        let duration = self.source_duration_ms;

        let mut padded: Vec<Span> = raw
            .iter()
            .map(|s| Span::new(s.start_ms.saturating_sub(pad), (s.end_ms + pad).min(duration)))
            .collect();

        for i in 1..padded.len() {
            if padded[i - 1].end_ms > padded[i].start_ms {
                let gap_start = raw[i - 1].end_ms;
                let gap_end = raw[i].start_ms.max(gap_start);
                let mid = gap_start + (gap_end - gap_start) / 2;
                padded[i - 1].end_ms = mid;
                padded[i].start_ms = mid;
            }
        }
        padded
    }

    /// Step 3.
    fn merge_short(
        &self,
        mut spans: Vec<Span>,
        stats: &mut SegmentationStats,
        warnings: &mut Vec<SegmentationWarning>,
    ) -> Vec<Span> {
        let min = self.policy.min_duration_ms();
        let max = self.policy.max_duration_ms();

        let mut i = 0;
        while i < spans.len() {
            let span = spans[i];
            if span.len() >= min {
                i += 1;
                continue;
            }

            if i + 1 < spans.len() {
                let next = spans[i + 1];
                if next.end_ms - span.start_ms <= max {
                    spans[i + 1].start_ms = span.start_ms;
                    spans.remove(i);
                    stats.merged += 1;
                } else {
                    warn!(start_ms = span.start_ms, end_ms = span.end_ms, "dropping short span: merge would exceed max");
                    warnings.push(SegmentationWarning::DroppedShortSpan {
                        start_ms: span.start_ms,
                        end_ms: span.end_ms,
                    });
                    spans.remove(i);
                    stats.dropped += 1;
                }
                // re-examine whatever now sits at `i`
                continue;
            }

            // last span: fold into the previous one
            if i > 0 && span.end_ms - spans[i - 1].start_ms <= max {
                spans[i - 1].end_ms = span.end_ms;
                stats.merged += 1;
            } else {
                let warning = if i == 0 {
                    SegmentationWarning::DroppedIsolatedSpan {
                        start_ms: span.start_ms,
                        end_ms: span.end_ms,
                    }
                } else {
                    SegmentationWarning::DroppedShortSpan {
                        start_ms: span.start_ms,
                        end_ms: span.end_ms,
                    }
                };
                warn!(?warning, "dropping trailing short span");
                warnings.push(warning);
                stats.dropped += 1;
            }
            spans.remove(i);
        }
        spans
    }

    /// Step 4 (WORD mode).
    fn split_long(&self, spans: Vec<Span>, stats: &mut SegmentationStats) -> Vec<Span> {
        let min = self.policy.min_duration_ms();
        let max = self.policy.max_duration_ms();

        let mut out = Vec::with_capacity(spans.len());
        for span in spans {
            if span.len() <= max {
                out.push(span);
                continue;
            }
            let pieces = split::split_span(span, min, max, self.energy);
            stats.split_added += pieces.len() - 1;
            out.extend(pieces);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(kind: BoundaryKind, ms: u64) -> SegmentBoundary {
        SegmentBoundary {
            kind,
            sample_offset: ms * 16,
            source_timestamp_ms: ms,
        }
    }

    fn spans(pairs: &[(u64, u64)]) -> Vec<SegmentBoundary> {
        pairs
            .iter()
            .flat_map(|&(s, e)| [b(BoundaryKind::Start, s), b(BoundaryKind::End, e)])
            .collect()
    }

    fn policy(mode: SegmentationMode, min: u64, max: u64, pad: u64) -> SegmentationPolicy {
        SegmentationPolicy::builder(mode)
            .min_duration_ms(min)
            .max_duration_ms(max)
            .padding_ms(pad)
            .build()
            .unwrap()
    }

    #[test]
    fn no_boundaries_is_empty_and_reports_no_speech() {
        let p = SegmentationPolicy::default();
        let seg = Segmenter::new(&p, 10_000).segment(Vec::new());
        assert!(seg.is_empty());
        assert!(matches!(
            seg.into_result(),
            Err(ShadowError::NoSpeechDetected { raw_spans: 0, .. })
        ));
    }

    #[test]
    fn padding_is_clipped_to_source() {
        let p = policy(SegmentationMode::Sentence, 100, 8_000, 200);
        let seg = Segmenter::new(&p, 2_000).segment(spans(&[(100, 1_900)]));
        assert_eq!(seg.boundaries(), vec![(0, 2_000)]);
    }

    #[test]
    fn overlapping_padding_meets_halfway() {
        let p = policy(SegmentationMode::Sentence, 100, 8_000, 300);
        let seg = Segmenter::new(&p, 10_000).segment(spans(&[(1_000, 2_000), (2_400, 3_400)]));
        assert_eq!(seg.boundaries(), vec![(700, 2_200), (2_200, 3_700)]);
    }

    #[test]
    fn short_span_merges_into_following() {
        let p = policy(SegmentationMode::Sentence, 500, 8_000, 0);
        let seg = Segmenter::new(&p, 10_000).segment(spans(&[(1_000, 1_200), (1_500, 3_000)]));
        assert_eq!(seg.boundaries(), vec![(1_000, 3_000)]);
        assert_eq!(seg.stats.merged, 1);
    }

    #[test]
    fn short_last_span_merges_into_previous() {
        let p = policy(SegmentationMode::Sentence, 500, 8_000, 0);
        let seg = Segmenter::new(&p, 10_000).segment(spans(&[(1_000, 3_000), (3_500, 3_700)]));
        assert_eq!(seg.boundaries(), vec![(1_000, 3_700)]);
    }

    #[test]
    fn short_span_dropped_when_merge_exceeds_max() {
        let p = policy(SegmentationMode::Sentence, 500, 2_000, 0);
        let seg = Segmenter::new(&p, 10_000).segment(spans(&[(1_000, 1_200), (1_500, 3_400)]));
        assert_eq!(seg.boundaries(), vec![(1_500, 3_400)]);
        assert_eq!(
            seg.warnings,
            vec![SegmentationWarning::DroppedShortSpan {
                start_ms: 1_000,
                end_ms: 1_200
            }]
        );
    }

    #[test]
    fn isolated_short_span_is_dropped_explicitly() {
        let p = policy(SegmentationMode::Sentence, 500, 8_000, 0);
        let seg = Segmenter::new(&p, 10_000).segment(spans(&[(1_000, 1_200)]));
        assert!(seg.is_empty());
        assert_eq!(seg.stats.dropped, 1);
        assert!(matches!(
            seg.warnings[0],
            SegmentationWarning::DroppedIsolatedSpan { .. }
        ));
        assert!(matches!(
            seg.into_result(),
            Err(ShadowError::NoSpeechDetected { raw_spans: 1, dropped: 1 })
        ));
    }

    #[test]
    fn sentence_mode_keeps_long_span_whole() {
        let p = policy(SegmentationMode::Sentence, 500, 2_000, 0);
        let seg = Segmenter::new(&p, 20_000).segment(spans(&[(0, 15_000)]));
        assert_eq!(seg.boundaries(), vec![(0, 15_000)]);
    }

    #[test]
    fn word_mode_splits_long_span() {
        let p = policy(SegmentationMode::Word, 300, 2_000, 0);
        let seg = Segmenter::new(&p, 20_000).segment(spans(&[(0, 15_000)]));
        assert!(seg.len() >= 7);
        assert_eq!(seg.stats.split_added, seg.len() - 1);
        assert!(seg.segments.iter().all(|s| s.duration_ms() <= 2_000));
    }

    #[test]
    fn order_index_is_sequential() {
        let p = policy(SegmentationMode::Sentence, 500, 8_000, 0);
        let seg = Segmenter::new(&p, 20_000)
            .segment(spans(&[(0, 1_000), (3_000, 4_000), (6_000, 7_000)]));
        let idx: Vec<u32> = seg.segments.iter().map(|s| s.order_index).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn unmatched_start_closes_at_source_end() {
        let p = policy(SegmentationMode::Sentence, 500, 8_000, 0);
        let seg = Segmenter::new(&p, 5_000).segment(vec![b(BoundaryKind::Start, 4_000)]);
        assert_eq!(seg.boundaries(), vec![(4_000, 5_000)]);
    }

    #[test]
    fn stray_end_is_ignored() {
        let p = policy(SegmentationMode::Sentence, 500, 8_000, 0);
        let mut bs = vec![b(BoundaryKind::End, 500)];
        bs.extend(spans(&[(1_000, 2_000)]));
        let seg = Segmenter::new(&p, 5_000).segment(bs);
        assert_eq!(seg.boundaries(), vec![(1_000, 2_000)]);
    }
}
