//! # Audio Processing Module
//!
//! Everything between "bytes on disk" and "samples the engine can consume".
//!
//! ## Key Components:
//! - **Normalizer**: ffmpeg-based conversion into the canonical waveform
//! - **WAV I/O**: reading 16-bit PCM frames and probing headers
//! - **Temporary artifacts**: drop guards that delete per-request files
//!
//! ## Canonical Waveform:
//! - **Sample Rate**: configured target (16kHz by default)
//! - **Channels**: configured target (mono by default)
//! - **Encoding**: signed 16-bit little-endian PCM in a WAV container

pub mod normalizer;
pub mod temp;
pub mod wav;

pub use normalizer::{AudioNormalizer, NormalizedWaveform};
pub use temp::TempArtifact;
