//! Storage seam for durable segments.
//!
//! The core hands segment drafts to a [`SegmentStore`] and never waits on
//! persistence to make progress. [`InMemorySegmentStore`] backs tests and
//! the command-line host.

pub mod counts;
pub mod transcribe;

pub use counts::PracticeCountWriter;
pub use transcribe::{transcribe_playlist, Transcriber, TranscriptionReport};

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    error::{Result, ShadowError},
    segment::{PayloadRef, PlaylistId, Segment, SegmentDraft, SegmentId, SourceAudioId},
};

/// Field changes for one segment. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentUpdate {
    pub practice_count_delta: u32,
    pub transcription: Option<String>,
    pub translation: Option<String>,
    pub audio_payload_ref: Option<PayloadRef>,
}

impl SegmentUpdate {
    pub fn practiced(times: u32) -> Self {
        Self {
            practice_count_delta: times,
            ..Default::default()
        }
    }

    pub fn transcription(text: impl Into<String>) -> Self {
        Self {
            transcription: Some(text.into()),
            ..Default::default()
        }
    }
}

pub trait SegmentStore: Send + Sync {
    /// Persist drafts under fresh ids, keeping their order.
    fn create_segments(
        &self,
        source: &SourceAudioId,
        playlist: &PlaylistId,
        drafts: &[SegmentDraft],
    ) -> Result<Vec<Segment>>;

    fn update_segment(&self, id: SegmentId, update: SegmentUpdate) -> Result<()>;

    /// Remove every segment of a playlist; returns how many were removed.
    fn delete_segments(&self, playlist: &PlaylistId) -> Result<usize>;

    /// Remove every segment cut from a source.
    fn delete_source_segments(&self, source: &SourceAudioId) -> Result<usize>;

    /// A playlist's segments sorted by `order_index`.
    fn segments(&self, playlist: &PlaylistId) -> Result<Vec<Segment>>;
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    segments: BTreeMap<SegmentId, Segment>,
}

#[derive(Debug, Default)]
pub struct InMemorySegmentStore {
    inner: RwLock<Inner>,
}

impl InMemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment(&self, id: SegmentId) -> Option<Segment> {
        self.inner.read().segments.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SegmentStore for InMemorySegmentStore {
    fn create_segments(
        &self,
        source: &SourceAudioId,
        playlist: &PlaylistId,
        drafts: &[SegmentDraft],
    ) -> Result<Vec<Segment>> {
        let mut inner = self.inner.write();
        let created: Vec<Segment> = drafts
            .iter()
            .map(|d| {
                inner.next_id += 1;
                Segment {
                    id: SegmentId(inner.next_id),
                    source_audio_id: source.clone(),
                    playlist_id: playlist.clone(),
                    start_ms: d.start_ms,
                    end_ms: d.end_ms,
                    order_index: d.order_index,
                    audio_payload_ref: None,
                    practice_count: 0,
                    transcription: None,
                    translation: None,
                }
            })
            .collect();
        for seg in &created {
            inner.segments.insert(seg.id, seg.clone());
        }
        debug!(playlist = %playlist, count = created.len(), "segments created");
        Ok(created)
    }

    fn update_segment(&self, id: SegmentId, update: SegmentUpdate) -> Result<()> {
        let mut inner = self.inner.write();
        let seg = inner
            .segments
            .get_mut(&id)
            .ok_or(ShadowError::SegmentNotFound(id.0))?;
        seg.practice_count = seg.practice_count.saturating_add(update.practice_count_delta);
        if let Some(text) = update.transcription {
            seg.transcription = Some(text);
        }
        if let Some(text) = update.translation {
            seg.translation = Some(text);
        }
        if let Some(payload) = update.audio_payload_ref {
            seg.audio_payload_ref = Some(payload);
        }
        Ok(())
    }

    fn delete_segments(&self, playlist: &PlaylistId) -> Result<usize> {
        let mut inner = self.inner.write();
        let before = inner.segments.len();
        inner.segments.retain(|_, s| &s.playlist_id != playlist);
        Ok(before - inner.segments.len())
    }

    fn delete_source_segments(&self, source: &SourceAudioId) -> Result<usize> {
        let mut inner = self.inner.write();
        let before = inner.segments.len();
        inner.segments.retain(|_, s| &s.source_audio_id != source);
        Ok(before - inner.segments.len())
    }

    fn segments(&self, playlist: &PlaylistId) -> Result<Vec<Segment>> {
        let inner = self.inner.read();
        let mut out: Vec<Segment> = inner
            .segments
            .values()
            .filter(|s| &s.playlist_id == playlist)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.order_index);
        Ok(out)
    }
}
