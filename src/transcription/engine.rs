//! # Inference Engine Handle
//!
//! Process-wide handle over the single loaded speech model.
//!
//! ## Key Responsibilities:
//! - **Loading**: build the model once at startup from local artifacts
//! - **Serialization**: the model keeps decoder caches between steps and is not
//!   reentrant, so every call takes the one model lock
//! - **Off-runtime execution**: WAV reading and inference run on the blocking pool
//! - **Statistics**: request, failure and audio/processing time totals
//!
//! Handles are cheap to clone; all clones share the same model.

use crate::audio::normalizer::NormalizedWaveform;
use crate::audio::wav;
use crate::config::ModelsConfig;
use crate::error::{AppError, AppResult, StartupError};
use crate::transcription::model::WhisperModel;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// A loaded speech-to-text model.
///
/// Implementations may mutate internal state while decoding; callers never invoke
/// `transcribe` concurrently on the same instance.
pub trait SpeechModel: Send + 'static {
    fn name(&self) -> &str;

    /// Transcribe mono 16-bit PCM at the configured sample rate.
    fn transcribe(&mut self, samples: &[i16]) -> anyhow::Result<String>;
}

/// Running totals across all transcriptions.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EngineStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_audio_secs: f64,
    pub total_processing_ms: u64,
}

impl EngineStats {
    /// Processing time per second of audio; below 1.0 is faster than real time.
    pub fn real_time_factor(&self) -> Option<f64> {
        if self.total_audio_secs > 0.0 {
            Some(self.total_processing_ms as f64 / 1000.0 / self.total_audio_secs)
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct EngineHandle {
    model: Arc<Mutex<Box<dyn SpeechModel>>>,
    stats: Arc<Mutex<EngineStats>>,
    name: Arc<str>,
}

impl EngineHandle {
    pub fn new(model: Box<dyn SpeechModel>) -> Self {
        let name: Arc<str> = Arc::from(model.name());
        Self {
            model: Arc::new(Mutex::new(model)),
            stats: Arc::new(Mutex::new(EngineStats::default())),
            name,
        }
    }

    /// Load the Whisper backend from the configured local artifacts.
    ///
    /// Runs on the blocking pool; weights can take seconds to map and validate.
    pub async fn load(config: &ModelsConfig) -> Result<Self, StartupError> {
        let config = config.clone();
        let model = tokio::task::spawn_blocking(move || WhisperModel::load(&config))
            .await
            .map_err(|e| StartupError::ModelLoad(format!("model loading task failed: {}", e)))?
            .map_err(|e| StartupError::ModelLoad(format!("{:#}", e)))?;

        Ok(Self::new(Box::new(model)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// Transcribe an already-normalized waveform.
    ///
    /// ## Returns:
    /// - **Ok(String)**: transcript, possibly empty for silence
    /// - **Err(AppError::Inference)**: unreadable waveform or model failure
    pub async fn transcribe(&self, waveform: &NormalizedWaveform) -> AppResult<String> {
        let path = waveform.path().to_path_buf();
        let model = Arc::clone(&self.model);
        let start_time = Instant::now();

        let outcome = tokio::task::spawn_blocking(move || -> AppResult<(String, f64)> {
            let pcm = wav::read_pcm16(&path)
                .map_err(|e| AppError::Inference(format!("cannot read waveform: {:#}", e)))?;
            let audio_secs = pcm.duration_secs();

            if pcm.samples.is_empty() {
                return Ok((String::new(), audio_secs));
            }

            let mut model = model.lock().map_err(|_| {
                AppError::Inference("speech model is unavailable after a panic".to_string())
            })?;
            let text = model
                .transcribe(&pcm.samples)
                .map_err(|e| AppError::Inference(format!("{:#}", e)))?;
            Ok((text, audio_secs))
        })
        .await
        .map_err(|e| AppError::Inference(format!("inference task failed: {}", e)))
        .and_then(|outcome| outcome);

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        if let Ok(mut stats) = self.stats.lock() {
            stats.total_requests += 1;
            stats.total_processing_ms += elapsed_ms;
            match &outcome {
                Ok((_, audio_secs)) => stats.total_audio_secs += audio_secs,
                Err(_) => stats.failed_requests += 1,
            }
        }

        match outcome {
            Ok((text, audio_secs)) => {
                tracing::info!(
                    model = %self.name,
                    audio_secs,
                    duration_ms = elapsed_ms,
                    chars = text.len(),
                    "Transcription completed"
                );
                Ok(text)
            }
            Err(e) => {
                tracing::error!(model = %self.name, error = %e, "Transcription failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").field("name", &self.name).finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::audio::wav::test_support::write_pcm16;
    use crate::audio::wav::WavFormat;
    use crate::audio::AudioNormalizer;
    use std::sync::atomic::Ordering;

    async fn waveform(dir: &std::path::Path, name: &str, samples: &[i16]) -> NormalizedWaveform {
        let path = dir.join(name);
        write_pcm16(&path, WavFormat::new(16000, 1, 16), samples);
        AudioNormalizer::new("ffmpeg", WavFormat::new(16000, 1, 16))
            .passthrough(&path)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_transcribe_passes_all_samples() {
        let dir = tempfile::tempdir().unwrap();
        let wave = waveform(dir.path(), "a.wav", &[1, 2, 3, 4, 5]).await;
        let engine = EngineHandle::new(Box::new(EchoModel));

        assert_eq!(engine.transcribe(&wave).await.unwrap(), "5 samples");
        assert_eq!(engine.name(), "echo");
        assert_eq!(engine.stats().total_requests, 1);
    }

    #[tokio::test]
    async fn test_model_error_is_inference_error() {
        let dir = tempfile::tempdir().unwrap();
        let wave = waveform(dir.path(), "a.wav", &[0; 160]).await;
        let engine = EngineHandle::new(Box::new(FailingModel));

        match engine.transcribe(&wave).await {
            Err(AppError::Inference(message)) => assert!(message.contains("decoder exploded")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(engine.stats().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_empty_waveform_skips_model() {
        let dir = tempfile::tempdir().unwrap();
        let wave = waveform(dir.path(), "empty.wav", &[]).await;
        let engine = EngineHandle::new(Box::new(FailingModel));

        assert_eq!(engine.transcribe(&wave).await.unwrap(), "");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let detector = OverlapDetector::default();
        let overlapped = Arc::clone(&detector.overlapped);
        let calls = Arc::clone(&detector.calls);
        let engine = EngineHandle::new(Box::new(detector));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let wave = waveform(dir.path(), &format!("{}.wav", i), &vec![0; 100 + i]).await;
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move { engine.transcribe(&wave).await }));
        }

        let mut transcripts = Vec::new();
        for task in tasks {
            transcripts.push(task.await.unwrap().unwrap());
        }

        assert!(!overlapped.load(Ordering::SeqCst));
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        // Each caller got its own result back.
        for (i, text) in transcripts.iter().enumerate() {
            assert_eq!(text, &format!("{} samples", 100 + i));
        }
    }

    #[test]
    fn test_real_time_factor() {
        let stats = EngineStats {
            total_requests: 2,
            failed_requests: 0,
            total_audio_secs: 10.0,
            total_processing_ms: 5000,
        };
        assert_eq!(stats.real_time_factor(), Some(0.5));
        assert_eq!(EngineStats::default().real_time_factor(), None);
    }
}
