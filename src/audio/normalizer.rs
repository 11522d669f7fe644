//! # Audio Normalization
//!
//! Converts any decodable input into the canonical waveform the engine expects
//! (mono, target sample rate, signed 16-bit little-endian PCM in a WAV container)
//! by running ffmpeg.
//!
//! ## Guarantees:
//! - The output is always a fresh `conv_<uuid>.wav` (next to the input unless a
//!   directory is given); the input is never modified or returned as the result of
//!   a conversion
//! - The output guard exists before ffmpeg starts, so a failed or cancelled
//!   conversion never leaves a partial file behind
//! - ffmpeg is awaited, not polled, and killed if the request future is dropped

use crate::audio::temp::TempArtifact;
use crate::audio::wav::{self, WavFormat};
use crate::config::AudioConfig;
use crate::error::{diagnostic_snippet, AppError, AppResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A waveform in the canonical target format.
///
/// `is_temporary()` tells the caller whether this waveform owns its file. Temporary
/// waveforms delete their file when dropped; passthrough waveforms borrow an existing
/// file (a corpus sample) and leave it alone.
#[derive(Debug)]
pub struct NormalizedWaveform {
    path: PathBuf,
    format: WavFormat,
    guard: Option<TempArtifact>,
}

impl NormalizedWaveform {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> WavFormat {
        self.format
    }

    pub fn is_temporary(&self) -> bool {
        self.guard.is_some()
    }

    /// Delete the backing file if this waveform owns it.
    pub fn release(self) {
        if let Some(guard) = self.guard {
            if let Err(e) = guard.cleanup() {
                warn!(path = %self.path.display(), error = %e, "Failed to remove normalized waveform");
            }
        }
    }
}

/// Runs ffmpeg to bring audio into the target format.
#[derive(Debug, Clone)]
pub struct AudioNormalizer {
    ffmpeg_bin: PathBuf,
    target: WavFormat,
}

impl AudioNormalizer {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, target: WavFormat) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            target,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(
            &config.ffmpeg_bin,
            WavFormat::new(config.sample_rate, config.channels, config.bit_depth),
        )
    }

    pub fn target(&self) -> WavFormat {
        self.target
    }

    /// Argument list handed to ffmpeg.
    ///
    /// Overwrite unconditionally, force channel count and sample rate, force
    /// `pcm_s16le`, force the WAV container.
    fn conversion_args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-ac".to_string(),
            self.target.channels.to_string(),
            "-ar".to_string(),
            self.target.sample_rate.to_string(),
            "-acodec".to_string(),
            "pcm_s16le".to_string(),
            "-f".to_string(),
            "wav".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }

    /// Convert `input` into a new temporary waveform next to it.
    pub async fn normalize(&self, input: &Path) -> AppResult<NormalizedWaveform> {
        let dir = input.parent().unwrap_or_else(|| Path::new("."));
        self.normalize_into(input, dir).await
    }

    /// Convert `input` into a new temporary waveform inside `dir`.
    ///
    /// Used when the input lives somewhere the service must not write to (the
    /// reference corpus).
    pub async fn normalize_into(&self, input: &Path, dir: &Path) -> AppResult<NormalizedWaveform> {
        let output = TempArtifact::reserve(dir, "conv", "wav");
        let start_time = Instant::now();

        debug!(
            input = %input.display(),
            output = %output.path().display(),
            "Normalizing audio"
        );

        let result = Command::new(&self.ffmpeg_bin)
            .args(self.conversion_args(input, output.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AppError::Conversion(format!(
                        "decoder '{}' is not installed",
                        self.ffmpeg_bin.display()
                    ))
                } else {
                    AppError::Conversion(format!("failed to run decoder: {}", e))
                }
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!(
                input = %input.display(),
                status = %result.status,
                stderr = %stderr.trim(),
                "Audio conversion failed"
            );
            return Err(AppError::Conversion(diagnostic_snippet(&stderr)));
        }

        let written = tokio::fs::metadata(output.path()).await.map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(AppError::Conversion("decoder produced no output".to_string()));
        }

        info!(
            input = %input.display(),
            bytes = written,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Audio normalized"
        );

        Ok(NormalizedWaveform {
            path: output.path().to_path_buf(),
            format: self.target,
            guard: Some(output),
        })
    }

    /// Use `path` as-is when it is already a WAV in the target format.
    ///
    /// Returns `None` when the file needs conversion (other container, other rate,
    /// other channel count, unreadable header).
    pub async fn passthrough(&self, path: &Path) -> Option<NormalizedWaveform> {
        let is_wav = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if !is_wav {
            return None;
        }

        let probe_path = path.to_path_buf();
        let format = tokio::task::spawn_blocking(move || wav::probe(&probe_path))
            .await
            .ok()?
            .ok()?;

        if format != self.target {
            debug!(path = %path.display(), ?format, "WAV file needs conversion");
            return None;
        }

        Some(NormalizedWaveform {
            path: path.to_path_buf(),
            format,
            guard: None,
        })
    }
}
