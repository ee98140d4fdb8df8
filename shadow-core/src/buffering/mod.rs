//! Lock-free SPSC ring buffer for live recording samples.
//!
//! A recorder callback pushes mono 16-bit samples with `push_slice`; the
//! user-turn listener drains them on its own thread. Neither side locks.

pub mod frame;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the recorder callback.
pub type SampleProducer = ringbuf::HeapProd<i16>;

/// Consumer half, held by the user-turn listener.
pub type SampleConsumer = ringbuf::HeapCons<i16>;

/// Buffer capacity: 2^20 samples ≈ 65 s at 16 kHz.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_sample_ring() -> (SampleProducer, SampleConsumer) {
    HeapRb::<i16>::new(RING_CAPACITY).split()
}
