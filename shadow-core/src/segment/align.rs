//! Caption alignment: attach timed caption text to segments by overlap.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Segment;

/// One timed caption line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caption {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl Caption {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    fn overlap_ms(&self, start_ms: u64, end_ms: u64) -> u64 {
        end_ms.min(self.end_ms).saturating_sub(start_ms.max(self.start_ms))
    }
}

/// Captions in one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionTrack {
    pub language: String,
    pub captions: Vec<Caption>,
}

/// The caption with the largest positive overlap with `[start_ms, end_ms)`.
/// Ties keep the earlier caption.
pub fn best_caption(captions: &[Caption], start_ms: u64, end_ms: u64) -> Option<&Caption> {
    let mut best: Option<(&Caption, u64)> = None;
    for c in captions {
        let overlap = c.overlap_ms(start_ms, end_ms);
        if overlap > best.map_or(0, |(_, o)| o) {
            best = Some((c, overlap));
        }
    }
    best.map(|(c, _)| c)
}

/// Set each segment's transcription from the best-overlapping caption.
/// Segments with no overlapping caption keep their current text.
/// Returns the number of segments updated.
pub fn align_captions(segments: &mut [Segment], captions: &[Caption]) -> usize {
    let mut updated = 0;
    for seg in segments.iter_mut() {
        if let Some(c) = best_caption(captions, seg.start_ms, seg.end_ms) {
            seg.transcription = Some(c.text.clone());
            updated += 1;
        }
    }
    debug!(updated, total = segments.len(), "captions aligned");
    updated
}

/// Align several languages at once: the first track fills the
/// transcription, the second the translation. Further tracks are ignored.
pub fn align_caption_tracks(segments: &mut [Segment], tracks: &[CaptionTrack]) {
    let mut tracks = tracks.iter();
    if let Some(primary) = tracks.next() {
        align_captions(segments, &primary.captions);
    }
    if let Some(secondary) = tracks.next() {
        for seg in segments.iter_mut() {
            if let Some(c) = best_caption(&secondary.captions, seg.start_ms, seg.end_ms) {
                seg.translation = Some(c.text.clone());
            }
        }
    }
}

/// Parse SubRip (`.srt`) text. Blocks without a timing line or without text
/// are skipped; markup tags are stripped; multi-line text is joined by spaces.
pub fn parse_srt(content: &str) -> Vec<Caption> {
    let normalized = content.replace("\r\n", "\n");
    let mut captions = Vec::new();

    for block in normalized.split("\n\n") {
        let mut timing: Option<(u64, u64)> = None;
        let mut text = Vec::new();
        for line in block.lines() {
            if timing.is_none() {
                if line.contains("-->") {
                    timing = parse_timing_line(line);
                    if timing.is_none() {
                        break;
                    }
                }
                continue;
            }
            let clean = strip_tags(line);
            let clean = clean.trim();
            if !clean.is_empty() {
                text.push(clean.to_string());
            }
        }
        if let Some((start, end)) = timing {
            if !text.is_empty() {
                captions.push(Caption::new(start, end, text.join(" ")));
            }
        }
    }
    captions
}

fn parse_timing_line(line: &str) -> Option<(u64, u64)> {
    let (a, b) = line.split_once("-->")?;
    Some((parse_timestamp(a.trim())?, parse_timestamp(b.trim())?))
}

/// `HH:MM:SS,mmm` (or `.` as the millisecond separator).
fn parse_timestamp(s: &str) -> Option<u64> {
    let s = s.split_whitespace().next()?;
    let (hms, millis) = s.split_once([',', '.'])?;
    let mut parts = hms.split(':');
    let h: u64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let sec: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let ms: u64 = millis.parse().ok()?;
    Some(h * 3_600_000 + m * 60_000 + sec * 1_000 + ms)
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for ch in line.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}
