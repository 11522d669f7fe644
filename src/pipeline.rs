//! # Transcription Pipeline
//!
//! Glue between an incoming upload and the engine handle.
//!
//! ## Request Flow:
//! 1. Reject extensions outside the allow-list (before any I/O)
//! 2. Reject declared sizes above the limit
//! 3. Stream the body into `<staging_dir>/upload_<uuid>.<ext>`, aborting as soon as
//!    the limit is crossed
//! 4. Normalize to the canonical waveform
//! 5. Transcribe
//! 6. Remove the normalized waveform, then the staged upload, whatever happened
//!
//! Every file created here is owned by a [`TempArtifact`] guard, so a dropped
//! request future (client disconnect) cleans up exactly like an error does.

use crate::audio::{AudioNormalizer, NormalizedWaveform, TempArtifact};
use crate::config::AudioConfig;
use crate::error::{AppError, AppResult};
use crate::transcription::EngineHandle;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Response body of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptResult {
    pub text: String,
    pub filename: String,
}

/// Response body of the sample endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SampleTranscript {
    pub sample_file: String,
    pub transcript: String,
}

#[derive(Clone)]
pub struct TranscriptionPipeline {
    normalizer: AudioNormalizer,
    audio: AudioConfig,
    /// Transcriptions currently in flight
    active: Arc<AtomicUsize>,
}

/// Keeps the in-flight gauge raised for as long as it lives.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TranscriptionPipeline {
    pub fn new(normalizer: AudioNormalizer, audio: AudioConfig) -> Self {
        Self {
            normalizer,
            audio,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_config(audio: &AudioConfig) -> Self {
        Self::new(AudioNormalizer::from_config(audio), audio.clone())
    }

    pub fn active_transcriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Transcribe one uploaded file.
    ///
    /// ## Parameters:
    /// - **filename**: client-supplied name; only its extension is used for storage
    /// - **body**: upload bytes in arbitrary chunks
    /// - **declared_len**: size announced by the client, if any
    ///
    /// ## Returns:
    /// - **Ok(TranscriptResult)**: transcript plus the original filename
    /// - **Err(AppError)**: the first failure; no temporary file survives either way
    pub async fn handle_upload<S, B, E>(
        &self,
        engine: &EngineHandle,
        filename: &str,
        body: S,
        declared_len: Option<u64>,
    ) -> AppResult<TranscriptResult>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let extension = self.check_extension(filename)?;
        if let Some(len) = declared_len {
            if len > self.audio.max_upload_bytes {
                return Err(self.too_large(filename, len));
            }
        }

        let _in_flight = InFlight::enter(&self.active);
        let start_time = Instant::now();

        let staged = self.stage(filename, &extension, body).await?;
        let outcome = self.normalize_and_transcribe(engine, staged.path(), None).await;
        if let Err(e) = staged.cleanup() {
            warn!(filename = %filename, error = %e, "Failed to remove staged upload");
        }

        let text = outcome?;
        info!(
            filename = %filename,
            duration_ms = start_time.elapsed().as_millis() as u64,
            chars = text.len(),
            "Upload transcribed"
        );

        Ok(TranscriptResult {
            text,
            filename: filename.to_string(),
        })
    }

    /// Transcribe the first recognized audio file of the corpus.
    ///
    /// Files are visited in a deterministic order (sorted by name at every level).
    /// Returns `Ok(None)` when nothing matches or the corpus does not exist.
    pub async fn transcribe_sample(
        &self,
        engine: &EngineHandle,
        corpus_dir: &Path,
    ) -> AppResult<Option<SampleTranscript>> {
        let dir = corpus_dir.to_path_buf();
        let audio = self.audio.clone();
        let sample = tokio::task::spawn_blocking(move || first_audio_file(&dir, &audio))
            .await
            .map_err(|e| AppError::Internal(format!("corpus scan failed: {}", e)))?;

        let Some(sample) = sample else {
            debug!(corpus = %corpus_dir.display(), "No audio files in corpus");
            return Ok(None);
        };

        let _in_flight = InFlight::enter(&self.active);
        debug!(sample = %sample.display(), "Transcribing corpus sample");

        let staging = self.audio.staging_path();
        let transcript = self
            .normalize_and_transcribe(engine, &sample, Some(&staging))
            .await?;

        Ok(Some(SampleTranscript {
            sample_file: sample.to_string_lossy().into_owned(),
            transcript,
        }))
    }

    /// Normalize `input` (or use it in place when it already matches the target),
    /// transcribe, then release the waveform.
    async fn normalize_and_transcribe(
        &self,
        engine: &EngineHandle,
        input: &Path,
        output_dir: Option<&Path>,
    ) -> AppResult<String> {
        let waveform: NormalizedWaveform = match output_dir {
            Some(dir) => match self.normalizer.passthrough(input).await {
                Some(waveform) => waveform,
                None => {
                    tokio::fs::create_dir_all(dir).await?;
                    self.normalizer.normalize_into(input, dir).await?
                }
            },
            None => self.normalizer.normalize(input).await?,
        };

        debug!(
            path = %waveform.path().display(),
            temporary = waveform.is_temporary(),
            "Waveform ready"
        );
        let text = engine.transcribe(&waveform).await;
        waveform.release();
        text
    }

    /// Lowercase extension of `filename`, if allow-listed.
    pub fn check_extension(&self, filename: &str) -> AppResult<String> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();

        if extension.is_empty() || !self.audio.is_supported_extension(&extension) {
            warn!(filename = %filename, extension = %extension, "Rejected unsupported upload");
            return Err(AppError::UnsupportedFormat(extension));
        }
        Ok(extension)
    }

    fn too_large(&self, filename: &str, size: u64) -> AppError {
        warn!(
            filename = %filename,
            size,
            limit = self.audio.max_upload_bytes,
            "Rejected oversized upload"
        );
        AppError::FileTooLarge {
            limit_bytes: self.audio.max_upload_bytes,
        }
    }

    /// Write the upload to a guarded staging file, enforcing the size limit.
    async fn stage<S, B, E>(&self, filename: &str, extension: &str, body: S) -> AppResult<TempArtifact>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let dir = self.audio.staging_path();
        tokio::fs::create_dir_all(&dir).await?;

        let staged = TempArtifact::reserve(&dir, "upload", extension);
        let mut file = tokio::fs::File::create(staged.path()).await?;
        let mut body = std::pin::pin!(body);
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| AppError::BadRequest(format!("upload interrupted: {}", e)))?;
            let bytes = chunk.as_ref();
            written += bytes.len() as u64;
            if written > self.audio.max_upload_bytes {
                return Err(self.too_large(filename, written));
            }
            file.write_all(bytes).await?;
        }
        file.flush().await?;

        if written == 0 {
            return Err(AppError::BadRequest("uploaded file is empty".to_string()));
        }

        debug!(
            filename = %filename,
            path = %staged.path().display(),
            bytes = written,
            "Upload staged"
        );
        Ok(staged)
    }
}

fn first_audio_file(dir: &Path, audio: &AudioConfig) -> Option<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| audio.is_supported_extension(ext))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
}
