//! # WAV Reading
//!
//! Thin layer over the `wav` crate: read the frames of a 16-bit PCM file into memory,
//! probe a file's format, and convert samples for the model.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::path::Path;

/// Format of a PCM waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl WavFormat {
    pub fn new(sample_rate: u32, channels: u16, bit_depth: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bit_depth,
        }
    }
}

/// Decoded 16-bit PCM waveform, frames interleaved when multi-channel.
#[derive(Debug)]
pub struct Pcm16 {
    pub format: WavFormat,
    pub samples: Vec<i16>,
}

impl Pcm16 {
    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        let frames = self.samples.len() / self.format.channels.max(1) as usize;
        frames as f64 / self.format.sample_rate.max(1) as f64
    }
}

/// Read every frame of a 16-bit PCM WAV file.
pub fn read_pcm16(path: &Path) -> Result<Pcm16> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let (header, data) = wav::read(&mut file)
        .with_context(|| format!("Failed to parse WAV file {}", path.display()))?;

    let format = WavFormat::new(header.sampling_rate, header.channel_count, header.bits_per_sample);
    match data {
        wav::BitDepth::Sixteen(samples) => Ok(Pcm16 { format, samples }),
        _ => Err(anyhow!(
            "Expected 16-bit PCM samples in {}, found {}-bit",
            path.display(),
            header.bits_per_sample
        )),
    }
}

/// Format of a WAV file. The `wav` crate has no header-only reader, so this
/// decodes the whole file.
pub fn probe(path: &Path) -> Result<WavFormat> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let (header, _) = wav::read(&mut file)
        .with_context(|| format!("Failed to parse WAV file {}", path.display()))?;
    Ok(WavFormat::new(header.sampling_rate, header.channel_count, header.bits_per_sample))
}

/// Scale 16-bit samples into `[-1.0, 1.0)`, the range the mel frontend expects.
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}
