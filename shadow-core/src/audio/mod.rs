//! Audio sources and sample-time arithmetic.
//!
//! Everything past this module runs at a single fixed rate,
//! [`TARGET_SAMPLE_RATE`]. Imported audio is converted with
//! [`resample::RateConverter`] before it reaches an [`AudioSource`].

pub mod cue;
pub mod resample;

use std::sync::Arc;

use crate::error::{Result, ShadowError};

/// Sample rate shared by analysis, VAD and segment arithmetic (Hz).
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Convert a sample offset to whole milliseconds (floor).
pub fn samples_to_ms(samples: u64, sample_rate: u32) -> u64 {
    samples * 1000 / u64::from(sample_rate.max(1))
}

/// Convert milliseconds to a sample count (floor).
pub fn ms_to_samples(ms: u64, sample_rate: u32) -> u64 {
    ms * u64::from(sample_rate) / 1000
}

/// Supplies mono 16-bit PCM at a fixed rate.
///
/// `pcm` may be called more than once; each call restarts the stream from
/// the beginning, which is what makes re-segmentation possible.
pub trait AudioSource: Send {
    fn sample_rate(&self) -> u32;

    fn duration_ms(&self) -> u64;

    fn pcm(&self) -> Box<dyn Iterator<Item = i16> + Send + '_>;

    /// Fail unless the source already runs at the segmentation rate.
    fn ensure_target_rate(&self) -> Result<()> {
        let actual = self.sample_rate();
        if actual == TARGET_SAMPLE_RATE {
            Ok(())
        } else {
            Err(ShadowError::SampleRateMismatch {
                expected: TARGET_SAMPLE_RATE,
                actual,
            })
        }
    }
}

/// A fully decoded buffer. Cheap to clone; samples are shared.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    samples: Arc<[i16]>,
    sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: impl Into<Arc<[i16]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples covering `[start_ms, end_ms)`, clipped to the buffer.
    pub fn slice_ms(&self, start_ms: u64, end_ms: u64) -> &[i16] {
        extract_pcm(&self.samples, self.sample_rate, start_ms, end_ms)
    }
}

impl AudioSource for PcmBuffer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn duration_ms(&self) -> u64 {
        samples_to_ms(self.samples.len() as u64, self.sample_rate)
    }

    fn pcm(&self) -> Box<dyn Iterator<Item = i16> + Send + '_> {
        Box::new(self.samples.iter().copied())
    }
}

/// Slice the samples of `[start_ms, end_ms)` out of a buffer at `sample_rate`.
pub fn extract_pcm(pcm: &[i16], sample_rate: u32, start_ms: u64, end_ms: u64) -> &[i16] {
    let len = pcm.len();
    let start = (ms_to_samples(start_ms, sample_rate) as usize).min(len);
    let end = (ms_to_samples(end_ms, sample_rate) as usize).clamp(start, len);
    &pcm[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_sample_conversions_at_16k() {
        assert_eq!(ms_to_samples(30, 16_000), 480);
        assert_eq!(samples_to_ms(480, 16_000), 30);
        assert_eq!(samples_to_ms(479, 16_000), 29);
    }

    #[test]
    fn extract_clips_to_buffer() {
        let pcm: Vec<i16> = (0..1_600).map(|i| i as i16).collect();
        let slice = extract_pcm(&pcm, 16_000, 50, 500);
        assert_eq!(slice.len(), 800);
        assert_eq!(slice[0], 800);
        assert!(extract_pcm(&pcm, 16_000, 200, 100).is_empty());
    }

    #[test]
    fn rate_check_rejects_other_rates() {
        let buf = PcmBuffer::new(vec![0i16; 10], 44_100);
        assert!(matches!(
            buf.ensure_target_rate(),
            Err(ShadowError::SampleRateMismatch { actual: 44_100, .. })
        ));
        assert!(PcmBuffer::new(vec![0i16; 10], 16_000)
            .ensure_target_rate()
            .is_ok());
    }

    #[test]
    fn duration_follows_sample_count() {
        let buf = PcmBuffer::new(vec![0i16; 48_000], 16_000);
        assert_eq!(buf.duration_ms(), 3_000);
    }
}
