//! Live user-turn listener: recorder ring → energy scorer → VAD.
//!
//! ## Loop (per iteration)
//!
//! ```text
//! 1. Drain the ring buffer (one chunk)
//! 2. Cut complete frames, score them, feed the VadMachine
//! 3. START → UserSpeechStarted, END → UserSilenceDetected (then exit)
//! ```
//!
//! Runs on its own OS thread so the session task never blocks on audio.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::{debug, info, trace};

use super::{EventSink, SessionEvent, Ticket};
use crate::{
    analysis::{threshold_for_sensitivity, EnergyScorer, FrameScore, FrameScorer},
    audio::ms_to_samples,
    buffering::{frame::AudioFrame, Consumer, SampleConsumer},
    vad::{BoundaryKind, VadMachine, VadTiming},
};

/// Samples drained from the ring per iteration (60 ms at 16 kHz).
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty.
const EMPTY_SLEEP_MS: u64 = 5;

pub struct UserTurnListener {
    consumer: SampleConsumer,
    ticket: Ticket,
    scorer: EnergyScorer,
    vad: VadMachine,
    threshold: f32,
    frame_samples: usize,
    pending: Vec<i16>,
    next_index: u64,
    next_start: u64,
    done: bool,
}

impl UserTurnListener {
    /// `timing.silence_threshold_ms` is the trailing silence that ends the turn.
    pub fn new(
        consumer: SampleConsumer,
        ticket: Ticket,
        timing: VadTiming,
        frame_ms: u32,
        sensitivity: f32,
    ) -> Self {
        let frame_samples = (ms_to_samples(u64::from(frame_ms), timing.sample_rate) as usize).max(1);
        Self {
            consumer,
            ticket,
            scorer: EnergyScorer::default(),
            vad: VadMachine::new(timing),
            threshold: threshold_for_sensitivity(sensitivity),
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            next_index: 0,
            next_start: 0,
            done: false,
        }
    }

    /// `true` once the turn's closing silence has been reported.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Drain whatever the recorder has produced and return the resulting
    /// events. Returns nothing once done.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        let mut chunk = [0i16; DRAIN_CHUNK];
        loop {
            let n = self.consumer.pop_slice(&mut chunk);
            if n == 0 {
                break;
            }
            self.pending.extend_from_slice(&chunk[..n]);
            self.process_frames(&mut events);
            if self.done {
                break;
            }
        }
        events
    }

    fn process_frames(&mut self, events: &mut Vec<SessionEvent>) {
        while !self.done && self.pending.len() >= self.frame_samples {
            let samples: Vec<i16> = self.pending.drain(..self.frame_samples).collect();
            let frame = AudioFrame::new(self.next_index, self.next_start, samples);
            let score = self.scorer.score(&frame).clamp(0.0, 1.0);
            self.next_index += 1;
            self.next_start = frame.end_sample();

            let fs = FrameScore {
                frame_index: frame.index,
                start_sample: frame.start_sample,
                sample_count: frame.samples.len() as u32,
                is_speech_candidate: score >= self.threshold,
                score,
            };
            trace!(frame = fs.frame_index, score, "live frame");

            match self.vad.push(&fs).map(|b| b.kind) {
                Some(BoundaryKind::Start) => {
                    debug!(ticket = self.ticket.0, "user speech started");
                    events.push(SessionEvent::UserSpeechStarted { ticket: self.ticket });
                }
                Some(BoundaryKind::End) => {
                    debug!(ticket = self.ticket.0, "user silence detected");
                    events.push(SessionEvent::UserSilenceDetected { ticket: self.ticket });
                    self.done = true;
                }
                None => {}
            }
        }
    }

    /// Blocking loop until the turn ends, `running` is cleared, or the
    /// session goes away.
    pub fn run(mut self, events: &EventSink, running: &AtomicBool) {
        info!(ticket = self.ticket.0, "listener started");
        while running.load(Ordering::Relaxed) && !self.done {
            let batch = self.poll();
            if batch.is_empty() && !self.done {
                std::thread::sleep(Duration::from_millis(EMPTY_SLEEP_MS));
                continue;
            }
            for event in batch {
                if events.post(event).is_err() {
                    return;
                }
            }
        }
        info!(ticket = self.ticket.0, "listener stopped");
    }
}

/// A listener running on its own thread.
pub(crate) struct ListenerTask {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ListenerTask {
    pub(crate) fn spawn(listener: UserTurnListener, events: EventSink) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name("shadow-listener".into())
            .spawn(move || listener.run(&events, &flag))?;
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// Signal the thread to exit. Does not wait for it.
    pub(crate) fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.thread.take();
    }
}

impl Drop for ListenerTask {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_sample_ring, Producer};

    fn timing(silence_ms: u32) -> VadTiming {
        VadTiming {
            sample_rate: 16_000,
            speech_confirm_ms: 90,
            silence_threshold_ms: silence_ms,
        }
    }

    fn tone(ms: usize) -> Vec<i16> {
        (0..ms * 16)
            .map(|i| ((i as f32 * 0.25).sin() * 10_000.0) as i16)
            .collect()
    }

    #[test]
    fn reports_speech_then_silence_once() {
        let (mut producer, consumer) = create_sample_ring();
        let mut listener = UserTurnListener::new(consumer, Ticket(7), timing(300), 30, 0.5);

        producer.push_slice(&vec![0i16; 16 * 300]);
        assert!(listener.poll().is_empty());

        producer.push_slice(&tone(600));
        assert_eq!(
            listener.poll(),
            vec![SessionEvent::UserSpeechStarted { ticket: Ticket(7) }]
        );

        producer.push_slice(&vec![0i16; 16 * 500]);
        assert_eq!(
            listener.poll(),
            vec![SessionEvent::UserSilenceDetected { ticket: Ticket(7) }]
        );
        assert!(listener.is_done());

        producer.push_slice(&tone(600));
        assert!(listener.poll().is_empty());
    }

    #[test]
    fn short_pause_does_not_end_turn() {
        let (mut producer, consumer) = create_sample_ring();
        let mut listener = UserTurnListener::new(consumer, Ticket(1), timing(500), 30, 0.5);
        producer.push_slice(&tone(400));
        producer.push_slice(&vec![0i16; 16 * 200]);
        producer.push_slice(&tone(400));
        let events = listener.poll();
        assert_eq!(events.len(), 1);
        assert!(!listener.is_done());
    }

    #[test]
    fn run_exits_when_cleared() {
        let (_producer, consumer) = create_sample_ring();
        let listener = UserTurnListener::new(consumer, Ticket(1), timing(300), 30, 0.5);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let running = AtomicBool::new(false);
        listener.run(&EventSink::new(tx), &running);
    }
}
