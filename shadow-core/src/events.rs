//! Observer-facing event types.
//!
//! | Event | Source |
//! |-------|--------|
//! | `SessionStatusEvent` | session driver broadcast, on every state change |
//! | `SegmentationReport` | segmentation job result, printed by the host |

use serde::Serialize;

use crate::{
    pipeline::{DiagnosticsSnapshot, JobOutcome},
    segment::{PlaylistId, SegmentDraft, SegmentId, SegmentationStats, SegmentationWarning},
    session::{PracticeSession, SessionState},
};

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    /// Monotonically increasing per session.
    pub seq: u64,
    pub playlist_id: PlaylistId,
    pub state: SessionState,
    /// Segment under the current position, if any.
    pub segment_id: Option<SegmentId>,
    pub total_segments: usize,
    /// Completed user turns per segment in this pass.
    pub pass_counts: Vec<u32>,
}

impl SessionStatusEvent {
    pub fn from_session(seq: u64, playlist_id: &PlaylistId, session: &PracticeSession) -> Self {
        let segment_id = session
            .position()
            .and_then(|p| session.segments().get(p.segment_index))
            .map(|s| s.id);
        Self {
            seq,
            playlist_id: playlist_id.clone(),
            state: session.state().clone(),
            segment_id,
            total_segments: session.segments().len(),
            pass_counts: session.pass_counts().to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Segmentation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationReport {
    pub source_duration_ms: u64,
    pub scorer: String,
    pub segments: Vec<SegmentDraft>,
    pub warnings: Vec<SegmentationWarning>,
    pub stats: SegmentationStats,
    pub diagnostics: DiagnosticsSnapshot,
}

impl SegmentationReport {
    pub fn new(source_duration_ms: u64, outcome: JobOutcome) -> Self {
        Self {
            source_duration_ms,
            scorer: outcome.scorer.to_string(),
            segments: outcome.segmentation.segments,
            warnings: outcome.segmentation.warnings,
            stats: outcome.segmentation.stats,
            diagnostics: outcome.diagnostics,
        }
    }
}
