//! # Artifact Acquisition
//!
//! Fetch-if-absent for the model files and extract-if-absent for the reference
//! corpus. Both run once during startup, before the engine is loaded.

pub mod corpus;
pub mod fetcher;

pub use corpus::CorpusBootstrapper;
pub use fetcher::ArtifactFetcher;
