//! Transcription seam: fill in missing segment text.

use serde::Serialize;
use tracing::{info, warn};

use super::{SegmentStore, SegmentUpdate};
use crate::{
    audio::{AudioSource, PcmBuffer},
    error::Result,
    segment::PlaylistId,
};

/// Speech-to-text provider.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionReport {
    pub transcribed: usize,
    /// Segments that already had text.
    pub skipped: usize,
    pub failed: usize,
}

/// Transcribe every segment of `playlist` that has no transcription yet.
/// Provider failures are counted and logged, never fatal.
pub fn transcribe_playlist(
    store: &dyn SegmentStore,
    playlist: &PlaylistId,
    audio: &PcmBuffer,
    transcriber: &dyn Transcriber,
) -> Result<TranscriptionReport> {
    let mut report = TranscriptionReport::default();
    for seg in store.segments(playlist)? {
        if seg.transcription.is_some() {
            report.skipped += 1;
            continue;
        }
        let pcm = audio.slice_ms(seg.start_ms, seg.end_ms);
        match transcriber.transcribe(pcm, audio.sample_rate()) {
            Ok(text) => {
                store.update_segment(seg.id, SegmentUpdate::transcription(text.trim()))?;
                report.transcribed += 1;
            }
            Err(e) => {
                warn!(segment = %seg.id, error = %e, "transcription failed");
                report.failed += 1;
            }
        }
    }
    info!(
        playlist = %playlist,
        transcribed = report.transcribed,
        skipped = report.skipped,
        failed = report.failed,
        "playlist transcription finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShadowError;
    use crate::segment::{SegmentDraft, SourceAudioId};
    use crate::store::InMemorySegmentStore;

    struct LengthTranscriber;

    impl Transcriber for LengthTranscriber {
        fn transcribe(&self, pcm: &[i16], _sample_rate: u32) -> Result<String> {
            if pcm.len() > 20_000 {
                return Err(ShadowError::Other(anyhow::anyhow!("too long")));
            }
            Ok(format!(" {} samples ", pcm.len()))
        }
    }

    #[test]
    fn fills_only_missing_text() {
        let store = InMemorySegmentStore::new();
        let pl = PlaylistId::from("p");
        let segs = store
            .create_segments(
                &SourceAudioId::from("a"),
                &pl,
                &[
                    SegmentDraft { order_index: 0, start_ms: 0, end_ms: 500 },
                    SegmentDraft { order_index: 1, start_ms: 500, end_ms: 1_000 },
                    SegmentDraft { order_index: 2, start_ms: 1_000, end_ms: 3_000 },
                ],
            )
            .unwrap();
        store
            .update_segment(segs[1].id, SegmentUpdate::transcription("kept"))
            .unwrap();

        let audio = PcmBuffer::new(vec![0i16; 48_000], 16_000);
        let report = transcribe_playlist(&store, &pl, &audio, &LengthTranscriber).unwrap();
        assert_eq!(
            report,
            TranscriptionReport { transcribed: 1, skipped: 1, failed: 1 }
        );
        assert_eq!(store.segment(segs[0].id).unwrap().transcription.as_deref(), Some("8000 samples"));
        assert_eq!(store.segment(segs[1].id).unwrap().transcription.as_deref(), Some("kept"));
    }
}
