//! WAV import and export via `hound`.

use std::path::Path;

use anyhow::{Context, Result};
use shadow_core::{audio::resample::convert_i16, PcmBuffer, TARGET_SAMPLE_RATE};
use tracing::info;

/// Decode a WAV file, mix it to mono and bring it to 16 kHz.
pub fn read_mono_16k(path: &Path) -> Result<PcmBuffer> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    // hound yields integer samples at their stored width, e.g. -128..127 for 8-bit.
    let full_scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => reader
            .samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / full_scale))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / full_scale))
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };

    let mono: Vec<i16> = interleaved
        .chunks(channels)
        .map(|frame| {
            let avg = frame.iter().sum::<f32>() / frame.len() as f32;
            (avg * 32_768.0).clamp(-32_768.0, 32_767.0) as i16
        })
        .collect();

    let samples = convert_i16(&mono, spec.sample_rate, TARGET_SAMPLE_RATE)?;
    info!(
        path = %path.display(),
        rate = spec.sample_rate,
        channels,
        samples = samples.len(),
        "audio imported"
    );
    Ok(PcmBuffer::new(samples, TARGET_SAMPLE_RATE))
}

/// Write mono 16-bit PCM at the target rate.
pub fn write_mono_16k(path: &Path, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
