//! Async session driver: one tokio task owns a [`PracticeSession`].
//!
//! ## Threading
//!
//! ```text
//! playback callbacks ─┐
//! listener thread ────┼─► EventSink (unbounded mpsc) ─► session task ─► Commands
//! UI / registry ──────┘                                    │
//!                                                          ├─► Playback / Recorder / CuePlayer / Assessor
//!                                                          ├─► PracticeCountWriter (background batching)
//!                                                          └─► broadcast<SessionStatusEvent>
//! ```
//!
//! Events are applied strictly in arrival order; nothing else mutates the
//! session. The user-turn timeout is a `Sleep` owned by the task, so `Stop`
//! interrupts every wait: the queue is always polled alongside it.

use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{
    listener::{ListenerTask, UserTurnListener},
    Command, PlayRequest, PracticeSession, SessionEvent, SessionState, Ticket,
};
use crate::{
    audio::{cue::CueKind, TARGET_SAMPLE_RATE},
    buffering::SampleConsumer,
    error::{Result, ShadowError},
    events::SessionStatusEvent,
    segment::{PayloadRef, PlaylistId, SegmentId},
    store::PracticeCountWriter,
    vad::VadTiming,
};

/// Status channel capacity: slow observers lag rather than block the session.
const STATUS_CAP: usize = 64;

/// Frame size and sensitivity for live user-turn detection.
const LISTEN_FRAME_MS: u32 = 30;
const LISTEN_SENSITIVITY: f32 = 0.5;
const LISTEN_CONFIRM_MS: u32 = 90;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Plays segment audio. Completion or failure must be posted to `events`
/// quoting `request.ticket`.
pub trait Playback: Send {
    fn play(&mut self, request: &PlayRequest, events: &EventSink) -> Result<()>;
    fn stop(&mut self);
}

/// Microphone access for user turns.
pub trait Recorder: Send {
    /// Open the microphone. Mono samples at 16 kHz flow into the returned
    /// ring consumer until [`Recorder::stop`].
    fn start(&mut self, record: bool) -> Result<SampleConsumer>;

    /// Close the microphone, returning the captured audio if `keep`.
    fn stop(&mut self, keep: bool) -> Option<PayloadRef>;
}

/// Fire-and-forget cue tones.
pub trait CuePlayer: Send {
    fn play_cue(&mut self, cue: CueKind);
}

/// Post-turn feedback. Must post `FeedbackComplete { ticket }` when done.
pub trait Assessor: Send {
    fn assess(
        &mut self,
        segment_id: SegmentId,
        recording: Option<&PayloadRef>,
        ticket: Ticket,
        events: &EventSink,
    );
}

pub struct Collaborators {
    pub playback: Box<dyn Playback>,
    pub recorder: Box<dyn Recorder>,
    pub cues: Box<dyn CuePlayer>,
    pub assessor: Option<Box<dyn Assessor>>,
}

/// Sending half of a session's event queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// # Errors
    /// `ShadowError::SessionClosed` once the session task has ended.
    pub fn post(&self, event: SessionEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| ShadowError::SessionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Final state of a finished session task.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub final_state: SessionState,
    pub pass_counts: Vec<u32>,
}

#[derive(Debug)]
pub struct SessionHandle {
    playlist_id: PlaylistId,
    events: EventSink,
    status: broadcast::Sender<SessionStatusEvent>,
    task: JoinHandle<SessionSummary>,
}

impl SessionHandle {
    pub fn playlist_id(&self) -> &PlaylistId {
        &self.playlist_id
    }

    pub fn events(&self) -> EventSink {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status.subscribe()
    }

    pub fn pause(&self) -> Result<()> {
        self.events.post(SessionEvent::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.events.post(SessionEvent::Resume)
    }

    pub fn skip_next(&self) -> Result<()> {
        self.events.post(SessionEvent::SkipNext)
    }

    pub fn skip_previous(&self) -> Result<()> {
        self.events.post(SessionEvent::SkipPrevious)
    }

    pub fn stop(&self) -> Result<()> {
        self.events.post(SessionEvent::Stop)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session task to end.
    pub async fn join(self) -> Result<SessionSummary> {
        self.task
            .await
            .map_err(|e| ShadowError::Other(anyhow::anyhow!("session task failed: {e}")))
    }
}

/// Start a session on the current tokio runtime.
///
/// # Errors
/// `ShadowError::EmptyPlaylist` when the session has no segments.
pub fn spawn_session(
    playlist_id: PlaylistId,
    session: PracticeSession,
    collaborators: Collaborators,
    counts: Option<PracticeCountWriter>,
) -> Result<SessionHandle> {
    if session.segments().is_empty() {
        return Err(ShadowError::EmptyPlaylist);
    }
    if *session.state() != SessionState::Idle {
        return Err(ShadowError::IllegalTransition {
            state: session.state().to_string(),
            event: "Start".into(),
        });
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let (status, _) = broadcast::channel(STATUS_CAP);
    let events = EventSink::new(tx);

    let driver = Driver {
        playlist_id: playlist_id.clone(),
        session,
        collab: collaborators,
        sink: events.clone(),
        status: status.clone(),
        counts,
        listener: None,
        last_recording: None,
        timer: None,
        seq: 0,
    };
    let span = info_span!("practice_session", playlist = %playlist_id);
    let task = tokio::spawn(driver.run(rx).instrument(span));

    Ok(SessionHandle {
        playlist_id,
        events,
        status,
        task,
    })
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

struct Driver {
    playlist_id: PlaylistId,
    session: PracticeSession,
    collab: Collaborators,
    sink: EventSink,
    status: broadcast::Sender<SessionStatusEvent>,
    counts: Option<PracticeCountWriter>,
    listener: Option<ListenerTask>,
    last_recording: Option<PayloadRef>,
    /// Ticket of the armed user-turn timer.
    timer: Option<Ticket>,
    seq: u64,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) -> SessionSummary {
        let sleep = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(sleep);

        self.apply(SessionEvent::Start, sleep.as_mut());

        while !self.is_over() {
            let event = tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(event) => event,
                    None => break,
                },
                () = &mut sleep, if self.timer.is_some() => {
                    let ticket = self.timer.take().unwrap_or_default();
                    SessionEvent::UserTurnTimeout { ticket }
                }
            };
            self.apply(event, sleep.as_mut());
        }

        self.shutdown().await;
        SessionSummary {
            final_state: self.session.state().clone(),
            pass_counts: self.session.pass_counts().to_vec(),
        }
    }

    fn is_over(&self) -> bool {
        matches!(
            self.session.state(),
            SessionState::Idle | SessionState::Completed
        )
    }

    fn apply(&mut self, event: SessionEvent, mut sleep: Pin<&mut Sleep>) {
        let name = event.name();
        let before = self.session.state().clone();
        let commands = match self.session.handle(event) {
            Ok(commands) => commands,
            Err(e) => {
                warn!(event = name, error = %e, "event rejected");
                return;
            }
        };
        if *self.session.state() != before {
            self.publish();
        }
        for command in commands {
            self.execute(command, sleep.as_mut());
        }
    }

    fn execute(&mut self, command: Command, sleep: Pin<&mut Sleep>) {
        debug!(?command, "execute");
        match command {
            Command::Play(request) => {
                if let Err(e) = self.collab.playback.play(&request, &self.sink) {
                    error!(error = %e, "playback failed to start");
                    self.post(SessionEvent::PlaybackFailed {
                        ticket: request.ticket,
                        reason: e.to_string(),
                    });
                }
            }
            Command::StopPlayback => self.collab.playback.stop(),
            Command::PlayCue(cue) => self.collab.cues.play_cue(cue),
            Command::StartListening { ticket, record } => self.start_listening(ticket, record),
            Command::StopListening { keep_recording } => {
                if let Some(listener) = self.listener.take() {
                    listener.stop();
                    self.last_recording = self.collab.recorder.stop(keep_recording);
                }
            }
            Command::StartTimer { ticket, duration_ms } => {
                sleep.reset(Instant::now() + Duration::from_millis(duration_ms));
                self.timer = Some(ticket);
            }
            Command::CancelTimer => self.timer = None,
            Command::IncrementPracticeCount { segment_id } => {
                if let Some(counts) = &self.counts {
                    counts.record(segment_id);
                }
            }
            Command::Assess { ticket, segment_id } => match self.collab.assessor.as_mut() {
                Some(assessor) => {
                    assessor.assess(segment_id, self.last_recording.as_ref(), ticket, &self.sink)
                }
                None => self.post(SessionEvent::FeedbackComplete { ticket }),
            },
            Command::Finished => info!(counts = ?self.session.pass_counts(), "practice finished"),
        }
    }

    fn start_listening(&mut self, ticket: Ticket, record: bool) {
        let consumer = match self.collab.recorder.start(record) {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(error = %e, "recorder failed to start");
                self.post(SessionEvent::RecordingFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        let timing = VadTiming {
            sample_rate: TARGET_SAMPLE_RATE,
            speech_confirm_ms: LISTEN_CONFIRM_MS,
            silence_threshold_ms: self.session.config().user_silence_ms,
        };
        let listener =
            UserTurnListener::new(consumer, ticket, timing, LISTEN_FRAME_MS, LISTEN_SENSITIVITY);
        match ListenerTask::spawn(listener, self.sink.clone()) {
            Ok(task) => self.listener = Some(task),
            Err(e) => {
                self.collab.recorder.stop(false);
                self.post(SessionEvent::RecordingFailed {
                    reason: format!("listener thread: {e}"),
                });
            }
        }
    }

    fn post(&self, event: SessionEvent) {
        if let Err(e) = self.sink.post(event) {
            warn!(error = %e, "could not queue event");
        }
    }

    fn publish(&mut self) {
        self.seq += 1;
        let event = SessionStatusEvent::from_session(self.seq, &self.playlist_id, &self.session);
        // No subscribers is fine.
        let _ = self.status.send(event);
    }

    async fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop();
            self.collab.recorder.stop(false);
        }
        self.collab.playback.stop();
        if let Some(counts) = self.counts.clone() {
            // The flush waits on the writer thread and the store behind it.
            match tokio::task::spawn_blocking(move || counts.flush()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "practice counts not flushed"),
                Err(e) => warn!(error = %e, "practice count flush task failed"),
            }
        }
        info!(state = %self.session.state(), "session task ended");
    }
}
