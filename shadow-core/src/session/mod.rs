//! Practice session state machine.
//!
//! ## States (STANDARD mode)
//!
//! ```text
//! Idle ──Start──► Playing(0) ──done──► Playing(r+1) … ──done──► AwaitingUser(0)
//!                    ▲                                    (bus mode: advance)
//!                    │                                             │ silence / timeout
//!                    │                                             ▼
//!                    │                           [Feedback(r)] ──► AwaitingUser(r+1) …
//!                    │                                             │ last user repeat
//!                    └──── next segment ◄──── advance ◄────────────┘
//!                                                │ no segments left
//!                                                ▼
//!                                            Completed
//! ```
//!
//! BUILDUP mode prefixes each segment with `Buildup(step)` phases. With
//! recording enabled, `Recording(r)` takes the place of `AwaitingUser(r)`.
//! Any active phase can be paused and resumed to the exact same position;
//! `Stop` returns to `Idle` from anywhere.
//!
//! The machine never performs I/O. [`PracticeSession::handle`] consumes one
//! event and returns the commands the driver must carry out. Every phase
//! entry issues a fresh [`Ticket`]; completion events quoting an older
//! ticket are stale and ignored, so a late "playback complete" from a
//! cancelled clip can never advance the session.

pub mod buildup;
pub mod config;
pub mod driver;
pub mod listener;
pub mod registry;

pub use buildup::{BuildupPlan, Clip};
pub use config::{PracticeConfig, PracticeMode};
pub use driver::{
    spawn_session, Assessor, Collaborators, CuePlayer, EventSink, Playback, Recorder,
    SessionHandle, SessionSummary,
};
pub use listener::UserTurnListener;
pub use registry::SessionRegistry;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    audio::cue::CueKind,
    error::{Result, ShadowError},
    segment::{Segment, SegmentId},
};

/// Identifies one phase entry. Completion events must quote the ticket of
/// the phase they complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(pub u64);

/// The slice of a [`Segment`] a session needs. Later edits to the stored
/// segment (text, counts) do not affect a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRef {
    pub id: SegmentId,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl SegmentRef {
    pub fn clip(&self) -> Clip {
        Clip::new(self.start_ms, self.end_ms)
    }
}

impl From<&Segment> for SegmentRef {
    fn from(s: &Segment) -> Self {
        Self {
            id: s.id,
            start_ms: s.start_ms,
            end_ms: s.end_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "phase")]
pub enum Phase {
    Buildup { step: u32 },
    Playing { repeat: u32 },
    AwaitingUser { repeat: u32 },
    Recording { repeat: u32 },
    Feedback { repeat: u32 },
}

impl Phase {
    fn is_playback(&self) -> bool {
        matches!(self, Phase::Buildup { .. } | Phase::Playing { .. })
    }

    fn is_user_turn(&self) -> bool {
        matches!(self, Phase::AwaitingUser { .. } | Phase::Recording { .. })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Buildup { step } => write!(f, "Buildup({step})"),
            Phase::Playing { repeat } => write!(f, "Playing({repeat})"),
            Phase::AwaitingUser { repeat } => write!(f, "AwaitingUser({repeat})"),
            Phase::Recording { repeat } => write!(f, "Recording({repeat})"),
            Phase::Feedback { repeat } => write!(f, "Feedback({repeat})"),
        }
    }
}

/// Where a session is: which segment, and which phase within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub segment_index: usize,
    #[serde(flatten)]
    pub phase: Phase,
}

impl Position {
    pub fn new(segment_index: usize, phase: Phase) -> Self {
        Self {
            segment_index,
            phase,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "message")]
pub enum PauseReason {
    /// External interrupt (user, audio focus loss, navigation prompt).
    Interrupted,
    PlaybackFailed(String),
    RecordingFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum SessionState {
    Idle,
    Active(Position),
    Paused { at: Position, reason: PauseReason },
    Completed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("Idle"),
            SessionState::Active(p) => write!(f, "{} of segment {}", p.phase, p.segment_index),
            SessionState::Paused { at, .. } => {
                write!(f, "Paused at {} of segment {}", at.phase, at.segment_index)
            }
            SessionState::Completed => f.write_str("Completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum SessionEvent {
    Start,
    PlaybackComplete { ticket: Ticket },
    PlaybackFailed { ticket: Ticket, reason: String },
    UserSpeechStarted { ticket: Ticket },
    UserSilenceDetected { ticket: Ticket },
    UserTurnTimeout { ticket: Ticket },
    RecordingFailed { reason: String },
    FeedbackComplete { ticket: Ticket },
    Pause,
    Resume,
    SkipNext,
    SkipPrevious,
    Stop,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Start => "Start",
            SessionEvent::PlaybackComplete { .. } => "PlaybackComplete",
            SessionEvent::PlaybackFailed { .. } => "PlaybackFailed",
            SessionEvent::UserSpeechStarted { .. } => "UserSpeechStarted",
            SessionEvent::UserSilenceDetected { .. } => "UserSilenceDetected",
            SessionEvent::UserTurnTimeout { .. } => "UserTurnTimeout",
            SessionEvent::RecordingFailed { .. } => "RecordingFailed",
            SessionEvent::FeedbackComplete { .. } => "FeedbackComplete",
            SessionEvent::Pause => "Pause",
            SessionEvent::Resume => "Resume",
            SessionEvent::SkipNext => "SkipNext",
            SessionEvent::SkipPrevious => "SkipPrevious",
            SessionEvent::Stop => "Stop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum PlayKind {
    Full { repeat: u32 },
    Buildup { step: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
    pub ticket: Ticket,
    pub segment_index: usize,
    pub segment_id: SegmentId,
    pub clip: Clip,
    pub speed: f32,
    pub kind: PlayKind,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play(PlayRequest),
    StopPlayback,
    PlayCue(CueKind),
    /// Open the microphone and run live VAD for a user turn.
    StartListening { ticket: Ticket, record: bool },
    StopListening { keep_recording: bool },
    StartTimer { ticket: Ticket, duration_ms: u64 },
    CancelTimer,
    IncrementPracticeCount { segment_id: SegmentId },
    /// Assess the latest user turn; the driver supplies the recording.
    Assess { ticket: Ticket, segment_id: SegmentId },
    Finished,
}

/// One pass over an ordered playlist.
#[derive(Debug, Clone)]
pub struct PracticeSession {
    segments: Vec<SegmentRef>,
    config: PracticeConfig,
    state: SessionState,
    ticket: Ticket,
    pass_counts: Vec<u32>,
    user_spoke: bool,
}

impl PracticeSession {
    /// `segments` must already be in `order_index` order.
    ///
    /// # Errors
    /// `ShadowError::InvalidConfig` when the config does not validate.
    pub fn new(segments: Vec<SegmentRef>, config: PracticeConfig) -> Result<Self> {
        config.validate()?;
        let n = segments.len();
        Ok(Self {
            segments,
            config,
            state: SessionState::Idle,
            ticket: Ticket::default(),
            pass_counts: vec![0; n],
            user_spoke: false,
        })
    }

    /// Sorts stored segments by `order_index` before building the session.
    pub fn from_segments(segments: &[Segment], config: PracticeConfig) -> Result<Self> {
        let mut ordered: Vec<&Segment> = segments.iter().collect();
        ordered.sort_by_key(|s| s.order_index);
        Self::new(ordered.into_iter().map(SegmentRef::from).collect(), config)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn position(&self) -> Option<Position> {
        match &self.state {
            SessionState::Active(p) => Some(*p),
            SessionState::Paused { at, .. } => Some(*at),
            SessionState::Idle | SessionState::Completed => None,
        }
    }

    pub fn current_ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn config(&self) -> &PracticeConfig {
        &self.config
    }

    pub fn segments(&self) -> &[SegmentRef] {
        &self.segments
    }

    /// Completed user turns per segment index in this pass.
    pub fn pass_counts(&self) -> &[u32] {
        &self.pass_counts
    }

    /// Whether the user has started speaking in the current turn.
    pub fn user_spoke(&self) -> bool {
        self.user_spoke
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Completed)
    }

    /// Apply one event.
    ///
    /// # Errors
    /// `ShadowError::IllegalTransition` when the event is not valid in the
    /// current state (the state is left unchanged), and
    /// `ShadowError::EmptyPlaylist` when starting with no segments.
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<Command>> {
        let name = event.name();
        let mut out = Vec::new();

        match event {
            SessionEvent::Start => {
                if self.state != SessionState::Idle {
                    return Err(self.illegal(name));
                }
                if self.segments.is_empty() {
                    return Err(ShadowError::EmptyPlaylist);
                }
                self.pass_counts = vec![0; self.segments.len()];
                info!(segments = self.segments.len(), mode = ?self.config.practice_mode, "session started");
                self.enter_segment(0, &mut out);
            }

            SessionEvent::PlaybackComplete { ticket } => {
                if let Some(pos) = self.current(ticket, name, Phase::is_playback)? {
                    self.playback_done(pos, &mut out);
                }
            }

            SessionEvent::PlaybackFailed { ticket, reason } => {
                if let Some(pos) = self.current(ticket, name, Phase::is_playback)? {
                    self.pause(pos, PauseReason::PlaybackFailed(reason), &mut out);
                }
            }

            SessionEvent::UserSpeechStarted { ticket } => {
                if self.current(ticket, name, Phase::is_user_turn)?.is_some() {
                    self.user_spoke = true;
                }
            }

            SessionEvent::UserSilenceDetected { ticket } => {
                if let Some(pos) = self.current(ticket, name, Phase::is_user_turn)? {
                    out.push(Command::CancelTimer);
                    self.user_turn_done(pos, &mut out);
                }
            }

            SessionEvent::UserTurnTimeout { ticket } => {
                if let Some(pos) = self.current(ticket, name, Phase::is_user_turn)? {
                    debug!(segment = pos.segment_index, spoke = self.user_spoke, "user turn timed out");
                    self.user_turn_done(pos, &mut out);
                }
            }

            SessionEvent::RecordingFailed { reason } => match &self.state {
                SessionState::Active(pos) if pos.phase.is_user_turn() => {
                    let pos = *pos;
                    self.pause(pos, PauseReason::RecordingFailed(reason), &mut out);
                }
                SessionState::Paused { .. } => {
                    debug!(%reason, "recording failure while paused ignored");
                }
                _ => return Err(self.illegal(name)),
            },

            SessionEvent::FeedbackComplete { ticket } => {
                if let Some(pos) = self.current(ticket, name, |p| matches!(p, Phase::Feedback { .. }))? {
                    if let Phase::Feedback { repeat } = pos.phase {
                        self.next_user_repeat(pos.segment_index, repeat, &mut out);
                    }
                }
            }

            SessionEvent::Pause => match &self.state {
                SessionState::Active(pos) => {
                    let pos = *pos;
                    self.pause(pos, PauseReason::Interrupted, &mut out);
                }
                SessionState::Paused { .. } => {}
                _ => return Err(self.illegal(name)),
            },

            SessionEvent::Resume => match &self.state {
                SessionState::Paused { at, .. } => {
                    let at = *at;
                    info!(segment = at.segment_index, phase = %at.phase, "session resumed");
                    self.enter(at, &mut out);
                }
                _ => return Err(self.illegal(name)),
            },

            SessionEvent::SkipNext => self.skip(true, name, &mut out)?,
            SessionEvent::SkipPrevious => self.skip(false, name, &mut out)?,

            SessionEvent::Stop => match &self.state {
                SessionState::Idle => {}
                SessionState::Active(pos) => {
                    let phase = pos.phase;
                    Self::cleanup(phase, &mut out);
                    self.finish_in(SessionState::Idle);
                    info!("session stopped");
                }
                SessionState::Paused { .. } | SessionState::Completed => {
                    self.finish_in(SessionState::Idle);
                    info!("session stopped");
                }
            },
        }

        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// The active position if `ticket` is current and `accepts` the phase;
    /// `None` for a stale ticket.
    fn current(
        &self,
        ticket: Ticket,
        event: &'static str,
        accepts: impl Fn(&Phase) -> bool,
    ) -> Result<Option<Position>> {
        match &self.state {
            SessionState::Active(pos) if ticket == self.ticket => {
                if accepts(&pos.phase) {
                    Ok(Some(*pos))
                } else {
                    Err(self.illegal(event))
                }
            }
            SessionState::Active(_) | SessionState::Paused { .. } => {
                debug!(?ticket, current = ?self.ticket, event, "stale completion ignored");
                Ok(None)
            }
            SessionState::Idle | SessionState::Completed => Err(self.illegal(event)),
        }
    }

    fn illegal(&self, event: &'static str) -> ShadowError {
        ShadowError::IllegalTransition {
            state: self.state.to_string(),
            event: event.to_string(),
        }
    }

    fn bump_ticket(&mut self) -> Ticket {
        self.ticket = Ticket(self.ticket.0 + 1);
        self.ticket
    }

    fn buildup_plan(&self, index: usize) -> Option<BuildupPlan> {
        if self.config.practice_mode != PracticeMode::Buildup {
            return None;
        }
        let plan = BuildupPlan::new(self.segments[index].clip(), self.config.buildup_chunk_ms);
        (!plan.is_empty()).then_some(plan)
    }

    fn first_phase(&self, index: usize) -> Phase {
        if self.buildup_plan(index).is_some() {
            Phase::Buildup { step: 0 }
        } else {
            Phase::Playing { repeat: 0 }
        }
    }

    fn user_phase(&self, repeat: u32) -> Phase {
        if self.config.records() {
            Phase::Recording { repeat }
        } else {
            Phase::AwaitingUser { repeat }
        }
    }

    fn enter_segment(&mut self, index: usize, out: &mut Vec<Command>) {
        let phase = self.first_phase(index);
        self.enter(Position::new(index, phase), out);
    }

    /// Make `pos` the active position and issue its commands.
    fn enter(&mut self, pos: Position, out: &mut Vec<Command>) {
        let ticket = self.bump_ticket();
        self.state = SessionState::Active(pos);
        self.user_spoke = false;
        let segment = self.segments[pos.segment_index];
        debug!(segment = pos.segment_index, phase = %pos.phase, ticket = ticket.0, "entering phase");

        match pos.phase {
            Phase::Buildup { step } => {
                let clip = self
                    .buildup_plan(pos.segment_index)
                    .and_then(|plan| plan.step(step as usize))
                    .unwrap_or_else(|| segment.clip());
                out.push(Command::PlayCue(CueKind::Playback));
                out.push(Command::Play(PlayRequest {
                    ticket,
                    segment_index: pos.segment_index,
                    segment_id: segment.id,
                    clip,
                    speed: self.config.playback_speed,
                    kind: PlayKind::Buildup { step },
                }));
            }
            Phase::Playing { repeat } => {
                out.push(Command::PlayCue(CueKind::Playback));
                out.push(Command::Play(PlayRequest {
                    ticket,
                    segment_index: pos.segment_index,
                    segment_id: segment.id,
                    clip: segment.clip(),
                    speed: self.config.playback_speed,
                    kind: PlayKind::Full { repeat },
                }));
            }
            Phase::AwaitingUser { .. } | Phase::Recording { .. } => {
                out.push(Command::PlayCue(CueKind::YourTurn));
                out.push(Command::StartListening {
                    ticket,
                    record: self.config.records(),
                });
                out.push(Command::StartTimer {
                    ticket,
                    duration_ms: self.config.user_turn_timeout_ms(segment.clip().duration_ms()),
                });
            }
            Phase::Feedback { .. } => {
                out.push(Command::Assess {
                    ticket,
                    segment_id: segment.id,
                });
            }
        }
    }

    fn playback_done(&mut self, pos: Position, out: &mut Vec<Command>) {
        let index = pos.segment_index;
        match pos.phase {
            Phase::Buildup { step } => {
                let steps = self.buildup_plan(index).map_or(0, |p| p.len());
                let next = if (step as usize) + 1 < steps {
                    Phase::Buildup { step: step + 1 }
                } else {
                    Phase::Playing { repeat: 0 }
                };
                self.enter(Position::new(index, next), out);
            }
            Phase::Playing { repeat } => {
                if repeat + 1 < self.config.playback_repeats {
                    self.enter(Position::new(index, Phase::Playing { repeat: repeat + 1 }), out);
                } else if self.config.bus_mode {
                    self.count(index, out);
                    self.advance(index, out);
                } else {
                    let phase = self.user_phase(0);
                    self.enter(Position::new(index, phase), out);
                }
            }
            _ => {}
        }
    }

    fn user_turn_done(&mut self, pos: Position, out: &mut Vec<Command>) {
        let repeat = match pos.phase {
            Phase::AwaitingUser { repeat } | Phase::Recording { repeat } => repeat,
            _ => return,
        };
        out.push(Command::StopListening {
            keep_recording: self.config.records(),
        });
        self.count(pos.segment_index, out);

        if self.config.assessment_enabled {
            self.enter(Position::new(pos.segment_index, Phase::Feedback { repeat }), out);
        } else {
            self.next_user_repeat(pos.segment_index, repeat, out);
        }
    }

    fn next_user_repeat(&mut self, index: usize, repeat: u32, out: &mut Vec<Command>) {
        if repeat + 1 < self.config.user_repeats {
            let phase = self.user_phase(repeat + 1);
            self.enter(Position::new(index, phase), out);
        } else {
            self.advance(index, out);
        }
    }

    fn count(&mut self, index: usize, out: &mut Vec<Command>) {
        self.pass_counts[index] += 1;
        out.push(Command::IncrementPracticeCount {
            segment_id: self.segments[index].id,
        });
    }

    /// Transient step between segments: done cue, then the next segment or
    /// completion.
    fn advance(&mut self, index: usize, out: &mut Vec<Command>) {
        out.push(Command::PlayCue(CueKind::SegmentDone));
        if index + 1 < self.segments.len() {
            self.enter_segment(index + 1, out);
        } else {
            self.complete(out);
        }
    }

    fn complete(&mut self, out: &mut Vec<Command>) {
        self.finish_in(SessionState::Completed);
        info!(counts = ?self.pass_counts, "session completed");
        out.push(Command::Finished);
    }

    fn finish_in(&mut self, state: SessionState) {
        self.bump_ticket();
        self.state = state;
        self.user_spoke = false;
    }

    fn pause(&mut self, pos: Position, reason: PauseReason, out: &mut Vec<Command>) {
        Self::cleanup(pos.phase, out);
        self.bump_ticket();
        info!(segment = pos.segment_index, phase = %pos.phase, ?reason, "session paused");
        self.state = SessionState::Paused { at: pos, reason };
    }

    fn skip(&mut self, forward: bool, event: &'static str, out: &mut Vec<Command>) -> Result<()> {
        let (pos, paused_reason) = match &self.state {
            SessionState::Active(p) => (*p, None),
            SessionState::Paused { at, reason } => (*at, Some(reason.clone())),
            SessionState::Idle | SessionState::Completed => return Err(self.illegal(event)),
        };

        let target = if forward {
            pos.segment_index + 1
        } else {
            pos.segment_index.saturating_sub(1)
        };
        debug!(from = pos.segment_index, to = target, "skip");

        match paused_reason {
            None => {
                Self::cleanup(pos.phase, out);
                if target < self.segments.len() {
                    self.enter_segment(target, out);
                } else {
                    self.complete(out);
                }
            }
            Some(reason) => {
                if target < self.segments.len() {
                    let at = Position::new(target, self.first_phase(target));
                    self.bump_ticket();
                    self.state = SessionState::Paused { at, reason };
                } else {
                    self.complete(out);
                }
            }
        }
        Ok(())
    }

    /// Commands that cancel whatever `phase` has in flight.
    fn cleanup(phase: Phase, out: &mut Vec<Command>) {
        match phase {
            Phase::Buildup { .. } | Phase::Playing { .. } => out.push(Command::StopPlayback),
            Phase::AwaitingUser { .. } | Phase::Recording { .. } => {
                out.push(Command::StopListening {
                    keep_recording: false,
                });
                out.push(Command::CancelTimer);
            }
            Phase::Feedback { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(n: u64) -> Vec<SegmentRef> {
        (0..n)
            .map(|i| SegmentRef {
                id: SegmentId(100 + i),
                start_ms: i * 3_000,
                end_ms: i * 3_000 + 2_000,
            })
            .collect()
    }

    fn session(n: u64, config: PracticeConfig) -> PracticeSession {
        PracticeSession::new(segs(n), config).unwrap()
    }

    /// Answers every command the way a well-behaved collaborator would and
    /// records each resting state as a compact label.
    fn autopilot(s: &mut PracticeSession) -> Vec<String> {
        let mut trace = Vec::new();
        let mut pending = s.handle(SessionEvent::Start).unwrap();
        loop {
            match s.state() {
                SessionState::Active(p) => trace.push(label(*p)),
                SessionState::Completed => {
                    trace.push("Completed".into());
                    return trace;
                }
                other => panic!("unexpected state {other}"),
            }
            let reply = pending
                .iter()
                .find_map(|c| match c {
                    Command::Play(req) => Some(SessionEvent::PlaybackComplete { ticket: req.ticket }),
                    Command::StartListening { ticket, .. } => {
                        Some(SessionEvent::UserSilenceDetected { ticket: *ticket })
                    }
                    Command::Assess { ticket, .. } => Some(SessionEvent::FeedbackComplete { ticket: *ticket }),
                    _ => None,
                })
                .expect("active phase issued no awaitable command");
            pending = s.handle(reply).unwrap();
        }
    }

    fn label(p: Position) -> String {
        let seg = p.segment_index;
        match p.phase {
            Phase::Buildup { step } => format!("Buildup(seg{seg},{step})"),
            Phase::Playing { repeat } => format!("Play(seg{seg},{repeat})"),
            Phase::AwaitingUser { repeat } => format!("AwaitUser(seg{seg},{repeat})"),
            Phase::Recording { repeat } => format!("Record(seg{seg},{repeat})"),
            Phase::Feedback { repeat } => format!("Feedback(seg{seg},{repeat})"),
        }
    }

    fn ticket_of(cmds: &[Command]) -> Ticket {
        cmds.iter()
            .find_map(|c| match c {
                Command::Play(r) => Some(r.ticket),
                Command::StartListening { ticket, .. } => Some(*ticket),
                Command::Assess { ticket, .. } => Some(*ticket),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn two_playbacks_one_user_turn_trace() {
        let mut s = session(
            2,
            PracticeConfig {
                playback_repeats: 2,
                user_repeats: 1,
                ..Default::default()
            },
        );
        assert_eq!(
            autopilot(&mut s),
            vec![
                "Play(seg0,0)",
                "Play(seg0,1)",
                "AwaitUser(seg0,0)",
                "Play(seg1,0)",
                "Play(seg1,1)",
                "AwaitUser(seg1,0)",
                "Completed",
            ]
        );
        assert_eq!(s.pass_counts(), &[1, 1]);
    }

    #[test]
    fn bus_mode_skips_user_turn() {
        let mut s = session(
            2,
            PracticeConfig {
                playback_repeats: 1,
                bus_mode: true,
                recording_enabled: true,
                ..Default::default()
            },
        );
        assert_eq!(autopilot(&mut s), vec!["Play(seg0,0)", "Play(seg1,0)", "Completed"]);
    }

    #[test]
    fn buildup_plays_suffixes_first() {
        let mut s = session(
            1,
            PracticeConfig {
                practice_mode: PracticeMode::Buildup,
                buildup_chunk_ms: 800,
                playback_repeats: 1,
                ..Default::default()
            },
        );
        assert_eq!(
            autopilot(&mut s),
            vec![
                "Buildup(seg0,0)",
                "Buildup(seg0,1)",
                "Play(seg0,0)",
                "AwaitUser(seg0,0)",
                "Completed",
            ]
        );
    }

    #[test]
    fn recording_and_assessment_phases() {
        let mut s = session(
            1,
            PracticeConfig {
                playback_repeats: 1,
                user_repeats: 2,
                recording_enabled: true,
                assessment_enabled: true,
                ..Default::default()
            },
        );
        assert_eq!(
            autopilot(&mut s),
            vec![
                "Play(seg0,0)",
                "Record(seg0,0)",
                "Feedback(seg0,0)",
                "Record(seg0,1)",
                "Feedback(seg0,1)",
                "Completed",
            ]
        );
        assert_eq!(s.pass_counts(), &[2]);
    }

    #[test]
    fn pause_in_second_user_turn_resumes_same_repeat() {
        let mut s = session(
            2,
            PracticeConfig {
                playback_repeats: 1,
                user_repeats: 2,
                ..Default::default()
            },
        );
        let cmds = s.handle(SessionEvent::Start).unwrap();
        let cmds = s
            .handle(SessionEvent::PlaybackComplete { ticket: ticket_of(&cmds) })
            .unwrap();
        let cmds = s
            .handle(SessionEvent::UserSilenceDetected { ticket: ticket_of(&cmds) })
            .unwrap();
        let target = Position::new(0, Phase::AwaitingUser { repeat: 1 });
        assert_eq!(s.state(), &SessionState::Active(target));
        let stale = ticket_of(&cmds);

        let paused = s.handle(SessionEvent::Pause).unwrap();
        assert!(paused.contains(&Command::CancelTimer));
        assert_eq!(
            s.state(),
            &SessionState::Paused {
                at: target,
                reason: PauseReason::Interrupted
            }
        );

        // the timer firing late is ignored
        assert!(s
            .handle(SessionEvent::UserTurnTimeout { ticket: stale })
            .unwrap()
            .is_empty());

        let resumed = s.handle(SessionEvent::Resume).unwrap();
        assert_eq!(s.state(), &SessionState::Active(target));
        assert!(resumed.contains(&Command::PlayCue(CueKind::YourTurn)));
        assert_ne!(ticket_of(&resumed), stale);
    }

    #[test]
    fn playback_failure_pauses_with_reason() {
        let mut s = session(1, PracticeConfig::default());
        let cmds = s.handle(SessionEvent::Start).unwrap();
        s.handle(SessionEvent::PlaybackFailed {
            ticket: ticket_of(&cmds),
            reason: "device unavailable".into(),
        })
        .unwrap();
        assert!(matches!(
            s.state(),
            SessionState::Paused { reason: PauseReason::PlaybackFailed(r), .. } if r == "device unavailable"
        ));
    }

    #[test]
    fn recording_failure_pauses() {
        let mut s = session(
            1,
            PracticeConfig {
                playback_repeats: 1,
                recording_enabled: true,
                ..Default::default()
            },
        );
        let cmds = s.handle(SessionEvent::Start).unwrap();
        s.handle(SessionEvent::PlaybackComplete { ticket: ticket_of(&cmds) })
            .unwrap();
        let cmds = s
            .handle(SessionEvent::RecordingFailed { reason: "mic busy".into() })
            .unwrap();
        assert!(cmds.contains(&Command::StopListening { keep_recording: false }));
        assert!(matches!(
            s.state(),
            SessionState::Paused { reason: PauseReason::RecordingFailed(_), .. }
        ));
    }

    #[test]
    fn playback_complete_while_idle_is_rejected() {
        let mut s = session(1, PracticeConfig::default());
        let err = s
            .handle(SessionEvent::PlaybackComplete { ticket: Ticket(0) })
            .unwrap_err();
        assert!(matches!(err, ShadowError::IllegalTransition { .. }));
        assert_eq!(s.state(), &SessionState::Idle);
    }

    #[test]
    fn wrong_completion_for_phase_is_rejected() {
        let mut s = session(1, PracticeConfig::default());
        let cmds = s.handle(SessionEvent::Start).unwrap();
        let before = s.state().clone();
        let err = s
            .handle(SessionEvent::UserSilenceDetected { ticket: ticket_of(&cmds) })
            .unwrap_err();
        assert!(matches!(err, ShadowError::IllegalTransition { .. }));
        assert_eq!(s.state(), &before);
    }

    #[test]
    fn stale_playback_complete_is_ignored() {
        let mut s = session(1, PracticeConfig::default());
        let first = s.handle(SessionEvent::Start).unwrap();
        s.handle(SessionEvent::PlaybackComplete { ticket: ticket_of(&first) })
            .unwrap();
        let before = s.state().clone();
        assert!(s
            .handle(SessionEvent::PlaybackComplete { ticket: ticket_of(&first) })
            .unwrap()
            .is_empty());
        assert_eq!(s.state(), &before);
    }

    #[test]
    fn start_twice_is_rejected_and_empty_playlist_errors() {
        let mut s = session(1, PracticeConfig::default());
        s.handle(SessionEvent::Start).unwrap();
        assert!(s.handle(SessionEvent::Start).is_err());

        let mut empty = PracticeSession::new(Vec::new(), PracticeConfig::default()).unwrap();
        assert!(matches!(
            empty.handle(SessionEvent::Start),
            Err(ShadowError::EmptyPlaylist)
        ));
    }

    #[test]
    fn stop_from_any_state_goes_idle() {
        let mut s = session(2, PracticeConfig::default());
        assert!(s.handle(SessionEvent::Stop).unwrap().is_empty());

        s.handle(SessionEvent::Start).unwrap();
        let cmds = s.handle(SessionEvent::Stop).unwrap();
        assert_eq!(cmds, vec![Command::StopPlayback]);
        assert_eq!(s.state(), &SessionState::Idle);

        s.handle(SessionEvent::Start).unwrap();
        s.handle(SessionEvent::Pause).unwrap();
        s.handle(SessionEvent::Stop).unwrap();
        assert_eq!(s.state(), &SessionState::Idle);
    }

    #[test]
    fn skip_navigation_moves_segment_index() {
        let mut s = session(3, PracticeConfig::default());
        s.handle(SessionEvent::Start).unwrap();
        let cmds = s.handle(SessionEvent::SkipNext).unwrap();
        assert_eq!(cmds[0], Command::StopPlayback);
        assert_eq!(s.position().unwrap().segment_index, 1);

        s.handle(SessionEvent::SkipPrevious).unwrap();
        s.handle(SessionEvent::SkipPrevious).unwrap();
        assert_eq!(s.position().unwrap().segment_index, 0);

        s.handle(SessionEvent::SkipNext).unwrap();
        s.handle(SessionEvent::SkipNext).unwrap();
        let cmds = s.handle(SessionEvent::SkipNext).unwrap();
        assert!(cmds.contains(&Command::Finished));
        assert!(s.is_finished());
    }

    #[test]
    fn skip_while_paused_stays_paused() {
        let mut s = session(2, PracticeConfig::default());
        s.handle(SessionEvent::Start).unwrap();
        s.handle(SessionEvent::Pause).unwrap();
        assert!(s.handle(SessionEvent::SkipNext).unwrap().is_empty());
        assert!(matches!(s.state(), SessionState::Paused { at, .. } if at.segment_index == 1));
    }

    #[test]
    fn from_segments_orders_by_order_index() {
        use crate::segment::{PlaylistId, SourceAudioId};
        let make = |id: u64, order: u32| Segment {
            id: SegmentId(id),
            source_audio_id: SourceAudioId::from("a"),
            playlist_id: PlaylistId::from("p"),
            start_ms: u64::from(order) * 1_000,
            end_ms: u64::from(order) * 1_000 + 500,
            order_index: order,
            audio_payload_ref: None,
            practice_count: 0,
            transcription: None,
            translation: None,
        };
        let s = PracticeSession::from_segments(&[make(7, 1), make(3, 0)], PracticeConfig::default())
            .unwrap();
        assert_eq!(s.segments()[0].id, SegmentId(3));
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let cfg = PracticeConfig {
            playback_repeats: 0,
            ..Default::default()
        };
        assert!(matches!(
            PracticeSession::new(segs(1), cfg),
            Err(ShadowError::InvalidConfig(_))
        ));
    }
}
