use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

fn spec(channels: u16, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// Write a mono f32 waveform as a 32-bit float WAV.
pub fn write_mono(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let mut writer = WavWriter::create(path, spec(1, sample_rate))
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}

/// Write a 2-channel f32 waveform, interleaving left/right.
/// The shorter channel is zero-padded to the longer one.
pub fn write_stereo(path: &Path, left: &[f32], right: &[f32], sample_rate: u32) -> Result<()> {
    let mut writer = WavWriter::create(path, spec(2, sample_rate))
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
    let len = left.len().max(right.len());
    for i in 0..len {
        writer.write_sample(left.get(i).copied().unwrap_or(0.0))?;
        writer.write_sample(right.get(i).copied().unwrap_or(0.0))?;
    }
    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}
