//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Imported files arrive at whatever rate they were recorded at (44.1 kHz,
//! 48 kHz, ...). Segmentation arithmetic and VAD models assume
//! [`TARGET_SAMPLE_RATE`](super::TARGET_SAMPLE_RATE), so the import path runs
//! audio through `RateConverter` once, before segmentation.
//!
//! When the rates already match, `RateConverter` is a passthrough and no
//! rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::error::{Result, ShadowError};

/// Input frames per rubato call.
const DEFAULT_CHUNK: usize = 1_024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when input rate == output rate.
    resampler: Option<FastFixedIn<f32>>,
    /// Holds input that did not fill a whole chunk yet.
    input_buf: Vec<f32>,
    chunk_size: usize,
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// Returns `ShadowError::Resample` if rubato fails to initialise.
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self> {
        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = f64::from(output_rate) / f64::from(input_rate);
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| ShadowError::Resample(format!("init: {e}")))?;
        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        debug!(input_rate, output_rate, chunk_size, "resampler created");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Feed samples; returns whatever output full chunks produced (may be empty).
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let (_, produced) = resampler
                .process_into_buffer(
                    &[&self.input_buf[..self.chunk_size]],
                    &mut self.output_buf,
                    None,
                )
                .map_err(|e| ShadowError::Resample(e.to_string()))?;
            result.extend_from_slice(&self.output_buf[0][..produced]);
            self.input_buf.drain(..self.chunk_size);
        }

        Ok(result)
    }

    /// Drain the held-back remainder at end of stream.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(Vec::new());
        };
        if self.input_buf.is_empty() {
            return Ok(Vec::new());
        }

        let (_, produced) = resampler
            .process_partial_into_buffer(Some(&[&self.input_buf[..]]), &mut self.output_buf, None)
            .map_err(|e| ShadowError::Resample(e.to_string()))?;
        self.input_buf.clear();
        Ok(self.output_buf[0][..produced].to_vec())
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert a complete mono 16-bit buffer to `output_rate`.
pub fn convert_i16(samples: &[i16], input_rate: u32, output_rate: u32) -> Result<Vec<i16>> {
    if input_rate == output_rate {
        return Ok(samples.to_vec());
    }

    let mut rc = RateConverter::new(input_rate, output_rate, DEFAULT_CHUNK)?;
    let floats: Vec<f32> = samples.iter().map(|&s| f32::from(s) / 32_768.0).collect();
    let mut out = rc.process(&floats)?;
    out.extend(rc.flush()?);

    // Trim the partial-chunk padding back to the expected length.
    let expected = (samples.len() as u64 * u64::from(output_rate) / u64::from(input_rate)) as usize;
    out.truncate(expected);

    Ok(out
        .into_iter()
        .map(|s| (s * 32_768.0).clamp(-32_768.0, 32_767.0) as i16)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples).unwrap(), samples);
    }

    #[test]
    fn partial_chunk_is_held_back() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).unwrap().is_empty());
        assert!(!rc.process(&vec![0.0f32; 500]).unwrap().is_empty());
    }

    #[test]
    fn whole_buffer_conversion_length() {
        let input = vec![0i16; 48_000]; // 1 s at 48 kHz
        let out = convert_i16(&input, 48_000, 16_000).unwrap();
        assert!(
            (out.len() as i64 - 16_000).abs() <= 64,
            "len={}",
            out.len()
        );
    }

    #[test]
    fn same_rate_conversion_is_copy() {
        let input: Vec<i16> = (0..100).collect();
        assert_eq!(convert_i16(&input, 16_000, 16_000).unwrap(), input);
    }
}
