//! # Transcription Module
//!
//! Speech-to-text inference behind a single serialized handle.
//!
//! ## Key Components:
//! - **Engine handle**: the `SpeechModel` seam, call serialization and statistics
//! - **Whisper backend**: candle Whisper loaded from local artifacts
//! - **Mel frontend**: filter bank for the log-mel spectrogram
//! - **Beam search**: hypothesis scoring with length normalization and word bonus

pub mod decode;
pub mod engine;
pub mod mel;
pub mod model;

pub use engine::EngineHandle;
