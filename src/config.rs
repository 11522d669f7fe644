//! # Configuration Management
//!
//! Loads the service configuration from multiple sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional TOML file (`config.toml`)
//! - Environment variables with the `APP_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_AUDIO__SAMPLE_RATE`, ...)
//! 3. Configuration file (`config.toml`)
//! 4. Default values
//!
//! Nested keys are separated by a double underscore because most field names
//! already contain single underscores (`max_upload_bytes`).
//!
//! ## Sections:
//! - **server**: bind address
//! - **audio**: canonical PCM target, upload allow-list and size limit, ffmpeg binary
//! - **models**: model / model-config / scorer artifacts and decoding parameters
//! - **corpus**: reference corpus archive and extraction directories
//! - **download**: artifact fetch timeout

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub models: ModelsConfig,
    pub corpus: CorpusConfig,
    pub download: DownloadConfig,
}

/// Server bind settings.
///
/// - `host = "127.0.0.1"`: only accept connections from localhost
/// - `host = "0.0.0.0"`: accept connections from any interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio pipeline settings.
///
/// ## Fields:
/// - `sample_rate`, `channels`, `bit_depth`: the canonical waveform every upload is
///   normalized to before inference (Whisper expects 16kHz mono 16-bit)
/// - `supported_extensions`: allow-list of upload extensions, lowercase, without dot
/// - `max_upload_bytes`: uploads above this size are rejected while staging
/// - `ffmpeg_bin`: decoder/resampler binary invoked by the normalizer
/// - `staging_dir`: where uploads and their normalized waveforms live for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub supported_extensions: Vec<String>,
    pub max_upload_bytes: u64,
    pub ffmpeg_bin: String,
    pub staging_dir: String,
}

/// Speech model artifacts and decoding parameters.
///
/// ## Artifacts:
/// Each artifact is a `(url, path)` pair; the path's existence means "already fetched".
/// - **model**: Whisper weights (safetensors)
/// - **model_config**: Whisper architecture (`config.json`)
/// - **scorer**: vocabulary used to score word boundaries and detokenize (`tokenizer.json`)
///
/// ## Decoding:
/// - `beam_width`: number of hypotheses kept per decoding step (1 = greedy)
/// - `alpha`: length normalization exponent applied to the summed log-probability
/// - `beta`: bonus added per emitted word
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub model_url: String,
    pub model_path: String,
    pub model_config_url: String,
    pub model_config_path: String,
    pub scorer_url: String,
    pub scorer_path: String,
    pub beam_width: usize,
    pub alpha: f32,
    pub beta: f32,
    /// Compute device preference (auto, cpu, cuda, metal)
    pub device: String,
}

/// Reference corpus used by the sample endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    pub archive_url: String,
    pub archive_path: String,
    /// Directory whose existence marks the corpus as bootstrapped
    pub dir: String,
    /// Directory the archive is unpacked into (the archive carries its own prefix)
    pub extract_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                channels: 1,
                bit_depth: 16,
                supported_extensions: ["wav", "flac", "mp3", "ogg", "m4a", "webm"]
                    .iter()
                    .map(|ext| ext.to_string())
                    .collect(),
                max_upload_bytes: 100 * 1024 * 1024,  // 100MB
                ffmpeg_bin: "ffmpeg".to_string(),
                staging_dir: "data/uploads".to_string(),
            },
            models: ModelsConfig {
                model_url: "https://huggingface.co/openai/whisper-tiny.en/resolve/main/model.safetensors".to_string(),
                model_path: "data/whisper-tiny.en/model.safetensors".to_string(),
                model_config_url: "https://huggingface.co/openai/whisper-tiny.en/resolve/main/config.json".to_string(),
                model_config_path: "data/whisper-tiny.en/config.json".to_string(),
                scorer_url: "https://huggingface.co/openai/whisper-tiny.en/resolve/main/tokenizer.json".to_string(),
                scorer_path: "data/whisper-tiny.en/tokenizer.json".to_string(),
                beam_width: 5,
                alpha: 1.0,
                beta: 0.0,
                device: "auto".to_string(),
            },
            corpus: CorpusConfig {
                archive_url: "https://www.openslr.org/resources/12/dev-clean.tar.gz".to_string(),
                archive_path: "data/dev-clean.tar.gz".to_string(),
                dir: "data/LibriSpeech/dev-clean".to_string(),
                extract_dir: "data".to_string(),
            },
            download: DownloadConfig {
                timeout_secs: 180,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`
    /// - `APP_AUDIO__MAX_UPLOAD_BYTES=10485760`
    /// - `APP_AUDIO__SUPPORTED_EXTENSIONS=wav,flac`
    /// - `APP_MODELS__BEAM_WIDTH=1`
    /// - `HOST=0.0.0.0`, `PORT=3000`: deployment platform conventions
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("audio.supported_extensions")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let mut config: AppConfig = settings.build()?.try_deserialize()?;
        config.audio.supported_extensions = config
            .audio
            .supported_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// The normalizer always emits `pcm_s16le`, so any other bit depth is a
    /// configuration error rather than something to discover per request.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Target sample rate must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Target channel count must be greater than 0"));
        }

        if self.audio.bit_depth != 16 {
            return Err(anyhow::anyhow!(
                "Unsupported target bit depth {} (only 16-bit PCM is produced)",
                self.audio.bit_depth
            ));
        }

        if self.audio.supported_extensions.is_empty() {
            return Err(anyhow::anyhow!("At least one supported audio extension is required"));
        }

        if self.audio.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.models.beam_width == 0 {
            return Err(anyhow::anyhow!("Beam width must be greater than 0"));
        }

        if self.models.alpha.is_nan() || self.models.alpha < 0.0 {
            return Err(anyhow::anyhow!("Alpha must be a non-negative number"));
        }

        if !self.models.beta.is_finite() {
            return Err(anyhow::anyhow!("Beta must be a finite number"));
        }

        if self.download.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Download timeout must be greater than 0"));
        }

        Ok(())
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download.timeout_secs)
    }
}

impl AudioConfig {
    /// Whether an extension (any case, with or without a leading dot) is allow-listed.
    pub fn is_supported_extension(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.').to_lowercase();
        self.supported_extensions.iter().any(|ext| *ext == extension)
    }

    pub fn staging_path(&self) -> PathBuf {
        PathBuf::from(&self.staging_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.bit_depth, 16);
        assert_eq!(config.download.timeout_secs, 180);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.bit_depth = 24;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.supported_extensions.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.beam_width = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.alpha = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extension_allow_list() {
        let audio = AppConfig::default().audio;
        assert!(audio.is_supported_extension("wav"));
        assert!(audio.is_supported_extension(".FLAC"));
        assert!(!audio.is_supported_extension("txt"));
        assert!(!audio.is_supported_extension(""));
    }
}
