//! Offline practice track: drives a [`PracticeSession`] without audio
//! devices and writes what a learner would hear into one PCM buffer.
//!
//! Playback completes instantly after its clip, and every user turn is a
//! gap as long as the clip at the configured speed, ending in silence.

use std::collections::{BTreeMap, VecDeque};

use anyhow::{bail, Result};
use shadow_core::{
    audio::{
        cue::{self, CueKind},
        resample::convert_i16,
        TARGET_SAMPLE_RATE,
    },
    segment::SegmentId,
    session::PlayRequest,
    Command, PcmBuffer, PracticeSession, SessionEvent,
};
use tracing::debug;

/// Pause after every cue and clip.
const GAP_MS: u64 = 300;

/// Longer pause between segments.
const SEGMENT_GAP_MS: u64 = 500;

#[derive(Debug, Default)]
pub struct RenderedTrack {
    pub samples: Vec<i16>,
    /// Completed user turns per segment.
    pub practice_counts: BTreeMap<SegmentId, u32>,
    pub clips_played: usize,
}

impl RenderedTrack {
    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1_000 / u64::from(TARGET_SAMPLE_RATE)
    }
}

pub fn render(session: &mut PracticeSession, source: &PcmBuffer) -> Result<RenderedTrack> {
    let volume = session.config().cue_volume;
    let mut track = RenderedTrack::default();
    let mut queue = VecDeque::from([SessionEvent::Start]);

    while let Some(event) = queue.pop_front() {
        for command in session.handle(event)? {
            debug!(?command, "render");
            match command {
                Command::PlayCue(kind) => {
                    track.samples.extend(cue::render(kind, volume));
                    let gap = if kind == CueKind::SegmentDone {
                        SEGMENT_GAP_MS
                    } else {
                        GAP_MS
                    };
                    track.samples.extend(cue::silence(gap));
                }
                Command::Play(request) => {
                    track.samples.extend(clip_at_speed(source, &request)?);
                    track.samples.extend(cue::silence(GAP_MS));
                    track.clips_played += 1;
                    queue.push_back(SessionEvent::PlaybackComplete {
                        ticket: request.ticket,
                    });
                }
                Command::StartListening { ticket, .. } => {
                    let turn_ms = current_clip_ms(session);
                    track.samples.extend(cue::silence(turn_ms + GAP_MS));
                    queue.push_back(SessionEvent::UserSilenceDetected { ticket });
                }
                Command::Assess { ticket, .. } => {
                    queue.push_back(SessionEvent::FeedbackComplete { ticket });
                }
                Command::IncrementPracticeCount { segment_id } => {
                    *track.practice_counts.entry(segment_id).or_default() += 1;
                }
                Command::StopPlayback
                | Command::StopListening { .. }
                | Command::StartTimer { .. }
                | Command::CancelTimer
                | Command::Finished => {}
            }
        }
    }

    if !session.is_finished() {
        bail!("practice stopped early in state {}", session.state());
    }
    Ok(track)
}

/// Resample the clip so it lasts `duration / speed`. Pitch follows speed.
fn clip_at_speed(source: &PcmBuffer, request: &PlayRequest) -> Result<Vec<i16>> {
    let clip = source.slice_ms(request.clip.start_ms, request.clip.end_ms);
    if (request.speed - 1.0).abs() < f32::EPSILON {
        return Ok(clip.to_vec());
    }
    let virtual_rate = (TARGET_SAMPLE_RATE as f32 * request.speed).round() as u32;
    Ok(convert_i16(clip, virtual_rate, TARGET_SAMPLE_RATE)?)
}

fn current_clip_ms(session: &PracticeSession) -> u64 {
    session
        .position()
        .and_then(|p| session.segments().get(p.segment_index))
        .map_or(0, |s| {
            session
                .config()
                .playback_duration_ms(s.clip().duration_ms())
        })
}
