//! Debounced practice-count persistence.
//!
//! The session records one increment per completed user turn; a background
//! thread folds increments per segment and writes each batch at most
//! `debounce` after its first increment. Dropping every writer clone flushes
//! what is pending and ends the thread.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::{SegmentStore, SegmentUpdate};
use crate::{
    error::{Result, ShadowError},
    segment::SegmentId,
};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

enum CountMsg {
    Increment(SegmentId),
    Flush(Sender<()>),
}

/// Single writer of `practice_count`. Cheap to clone.
#[derive(Clone)]
pub struct PracticeCountWriter {
    tx: Sender<CountMsg>,
}

impl PracticeCountWriter {
    /// Start the background writer thread.
    pub fn spawn(store: Arc<dyn SegmentStore>, debounce: Duration) -> Result<Self> {
        let (tx, rx) = unbounded();
        std::thread::Builder::new()
            .name("shadow-count-writer".into())
            .spawn(move || run(rx, store, debounce))?;
        Ok(Self { tx })
    }

    /// Queue one increment. Never blocks.
    pub fn record(&self, segment_id: SegmentId) {
        if self.tx.send(CountMsg::Increment(segment_id)).is_err() {
            warn!(%segment_id, "count writer gone; increment lost");
        }
    }

    /// Write everything queued so far and wait until it is stored.
    pub fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(CountMsg::Flush(ack_tx))
            .map_err(|_| ShadowError::SessionClosed)?;
        ack_rx.recv().map_err(|_| ShadowError::SessionClosed)
    }
}

fn run(rx: Receiver<CountMsg>, store: Arc<dyn SegmentStore>, debounce: Duration) {
    let mut pending: BTreeMap<SegmentId, u32> = BTreeMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let msg = match deadline {
            Some(at) => rx.recv_deadline(at),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match msg {
            Ok(CountMsg::Increment(id)) => {
                *pending.entry(id).or_default() += 1;
                deadline.get_or_insert_with(|| Instant::now() + debounce);
            }
            Ok(CountMsg::Flush(ack)) => {
                write_batch(store.as_ref(), &mut pending);
                deadline = None;
                let _ = ack.send(());
            }
            Err(RecvTimeoutError::Timeout) => {
                write_batch(store.as_ref(), &mut pending);
                deadline = None;
            }
            Err(RecvTimeoutError::Disconnected) => {
                write_batch(store.as_ref(), &mut pending);
                break;
            }
        }
    }
    debug!("count writer stopped");
}

fn write_batch(store: &dyn SegmentStore, pending: &mut BTreeMap<SegmentId, u32>) {
    if pending.is_empty() {
        return;
    }
    debug!(segments = pending.len(), "writing practice counts");
    for (id, delta) in std::mem::take(pending) {
        if let Err(e) = store.update_segment(id, SegmentUpdate::practiced(delta)) {
            warn!(%id, error = %e, "practice count not stored");
        }
    }
}
