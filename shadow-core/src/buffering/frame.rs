//! Fixed-duration slices of mono PCM handed to a frame scorer.

/// A contiguous block of mono 16-bit samples plus its position in the stream.
///
/// The last frame of a stream may be shorter than the configured frame size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Zero-based frame number within the stream.
    pub index: u64,
    /// Offset of the first sample, counted from the start of the stream.
    pub start_sample: u64,
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(index: u64, start_sample: u64, samples: Vec<i16>) -> Self {
        Self {
            index,
            start_sample,
            samples,
        }
    }

    /// Offset one past the last sample of this frame.
    pub fn end_sample(&self) -> u64 {
        self.start_sample + self.samples.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
