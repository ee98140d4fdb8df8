//! One live practice session per playlist.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::{
    driver::{spawn_session, Collaborators, EventSink, SessionHandle},
    PracticeSession,
};
use crate::{
    error::{Result, ShadowError},
    segment::PlaylistId,
    store::PracticeCountWriter,
};

/// Tracks running sessions. Cheap to clone; clones share the table.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashMap<PlaylistId, EventSink>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a session for `playlist_id`.
    ///
    /// # Errors
    /// `ShadowError::SessionAlreadyActive` while another session for the same
    /// playlist is still running; nothing is queued.
    pub fn start(
        &self,
        playlist_id: PlaylistId,
        session: PracticeSession,
        collaborators: Collaborators,
        counts: Option<PracticeCountWriter>,
    ) -> Result<SessionHandle> {
        let mut active = self.active.lock();
        active.retain(|_, sink| !sink.is_closed());

        if active.contains_key(&playlist_id) {
            warn!(playlist = %playlist_id, "session already active");
            return Err(ShadowError::SessionAlreadyActive {
                playlist_id: playlist_id.to_string(),
            });
        }

        let handle = spawn_session(playlist_id.clone(), session, collaborators, counts)?;
        info!(playlist = %playlist_id, "session registered");
        active.insert(playlist_id, handle.events());
        Ok(handle)
    }

    pub fn is_active(&self, playlist_id: &PlaylistId) -> bool {
        self.active
            .lock()
            .get(playlist_id)
            .is_some_and(|sink| !sink.is_closed())
    }

    /// Event queue of a running session, for routing interrupts.
    pub fn events(&self, playlist_id: &PlaylistId) -> Option<EventSink> {
        self.active
            .lock()
            .get(playlist_id)
            .filter(|sink| !sink.is_closed())
            .cloned()
    }

    /// Ask every running session to stop.
    pub fn stop_all(&self) {
        for (playlist, sink) in self.active.lock().iter() {
            if sink.post(super::SessionEvent::Stop).is_err() {
                info!(playlist = %playlist, "session already ended");
            }
        }
    }
}
