//! # Error Handling
//!
//! Two error families live here:
//!
//! - [`StartupError`]: artifact download, corpus bootstrap and model load failures.
//!   These are fatal; the process never reports itself ready after one of them.
//! - [`AppError`]: per-request failures. They are caught at the handler boundary and
//!   rendered as a JSON error body by the `ResponseError` impl, after the pipeline
//!   has already removed its temporary files.
//!
//! ## HTTP Status Code Mapping:
//! - UnsupportedFormat / BadRequest → 400
//! - NotFound → 404
//! - FileTooLarge → 413
//! - Conversion / Inference / Internal / ConfigError → 500
//! - ModelNotLoaded → 503

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Longest diagnostic snippet (in characters) echoed back to clients.
pub const MAX_DIAGNOSTIC_CHARS: usize = 300;

/// Failures of the startup bootstrap sequence.
#[derive(Debug)]
pub enum StartupError {
    /// Fetching a remote artifact failed (transport error, timeout, non-success status)
    Download { url: String, reason: String },

    /// The reference corpus could not be fetched or extracted
    Bootstrap(String),

    /// The model, model configuration or scorer could not be parsed
    ModelLoad(String),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Download { url, reason } => {
                write!(f, "Download of {} failed: {}", url, reason)
            }
            StartupError::Bootstrap(msg) => write!(f, "Corpus bootstrap failed: {}", msg),
            StartupError::ModelLoad(msg) => write!(f, "Model load failed: {}", msg),
        }
    }
}

impl std::error::Error for StartupError {}

/// Request-level errors.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::UnsupportedFormat("txt".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Declared extension is not in the allow-list
    UnsupportedFormat(String),

    /// Upload exceeded the configured maximum size
    FileTooLarge { limit_bytes: u64 },

    /// The external decoder failed; holds a short stderr snippet
    Conversion(String),

    /// The inference engine failed on a normalized waveform
    Inference(String),

    /// Bootstrap has not installed the engine yet
    ModelNotLoaded,

    /// Client sent an invalid request (missing file, empty upload, broken multipart)
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Anything else that went wrong on our side
    Internal(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::UnsupportedFormat(_) => "unsupported_format",
            AppError::FileTooLarge { .. } => "file_too_large",
            AppError::Conversion(_) => "conversion_error",
            AppError::Inference(_) => "inference_error",
            AppError::ModelNotLoaded => "model_not_loaded",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
            AppError::ConfigError(_) => "config_error",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::UnsupportedFormat(ext) => {
                write!(f, "Unsupported audio format: '{}'", ext)
            }
            AppError::FileTooLarge { limit_bytes } => {
                write!(f, "File too large (max {} bytes)", limit_bytes)
            }
            AppError::Conversion(msg) => write!(f, "Audio conversion failed: {}", msg),
            AppError::Inference(msg) => write!(f, "Transcription failed: {}", msg),
            AppError::ModelNotLoaded => write!(f, "Speech model is not loaded yet"),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into the JSON body clients see:
///
/// ```json
/// {
///   "error": {
///     "type": "file_too_large",
///     "message": "File too large (max 104857600 bytes)",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::UnsupportedFormat(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Conversion(_)
            | AppError::Inference(_)
            | AppError::Internal(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// `?` on an anyhow error inside a handler becomes a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

/// Keep the tail of a diagnostic (where ffmpeg and friends put the actual error),
/// bounded to [`MAX_DIAGNOSTIC_CHARS`] characters.
pub fn diagnostic_snippet(raw: &str) -> String {
    let trimmed = raw.trim();
    let count = trimmed.chars().count();
    if count <= MAX_DIAGNOSTIC_CHARS {
        return trimmed.to_string();
    }

    let tail: String = trimmed.chars().skip(count - MAX_DIAGNOSTIC_CHARS).collect();
    format!("...{}", tail)
}
