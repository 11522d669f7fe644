//! # Whisper Backend
//!
//! Candle Whisper model loaded from the three local artifacts fetched at startup.
//!
//! ## Artifacts:
//! - **model_path**: safetensors weights
//! - **model_config_path**: `config.json` describing the architecture
//! - **scorer_path**: `tokenizer.json`, the vocabulary used to detect word
//!   boundaries during beam scoring and to turn tokens back into text
//!
//! ## Decoding:
//! Audio is cut into 30 second chunks. Each chunk is turned into a log-mel
//! spectrogram, encoded once, then decoded with a batched beam search where
//! every live hypothesis is one row of the decoder batch.

use crate::audio::wav::pcm_to_float;
use crate::config::ModelsConfig;
use crate::device::DeviceManager;
use crate::transcription::decode::{BeamConfig, BeamSearch};
use crate::transcription::engine::SpeechModel;
use crate::transcription::mel::mel_filters;
use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::time::Instant;
use tokenizers::Tokenizer;

/// Multilingual checkpoints have a larger vocabulary than the English-only ones.
const MULTILINGUAL_VOCAB_SIZE: usize = 51865;

/// Byte-level BPE marker for a leading space.
const WORD_START_MARKER: char = 'Ġ';

pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    tokenizer: Tokenizer,
    device: Device,
    mel_filters: Vec<f32>,
    beam: BeamConfig,
    /// SOT, optional language, task and no-timestamps tokens
    prompt: Vec<u32>,
    eot: u32,
    /// `word_starts[id]` for every id up to `eot`
    word_starts: Vec<bool>,
    name: String,
}

impl WhisperModel {
    /// Load weights, configuration and scorer from local paths.
    ///
    /// ## Returns:
    /// - **Ok(WhisperModel)**: ready to transcribe
    /// - **Err(anyhow::Error)**: an artifact is missing or cannot be parsed
    pub fn load(models: &ModelsConfig) -> Result<Self> {
        let start_time = Instant::now();
        let device = DeviceManager::from_preference(&models.device);

        tracing::info!(
            model = %models.model_path,
            device = DeviceManager::describe(&device),
            beam_width = models.beam_width,
            alpha = models.alpha,
            beta = models.beta,
            "Loading Whisper model"
        );

        let config_text = std::fs::read_to_string(&models.model_config_path)
            .with_context(|| format!("cannot read model config {}", models.model_config_path))?;
        let config: Config = serde_json::from_str(&config_text)
            .with_context(|| format!("cannot parse model config {}", models.model_config_path))?;

        let tokenizer = Tokenizer::from_file(&models.scorer_path)
            .map_err(|e| anyhow!("cannot load scorer {}: {}", models.scorer_path, e))?;

        // SAFETY: the weights file is memory-mapped read-only and not modified while loaded
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&models.model_path], m::DTYPE, &device)
                .with_context(|| format!("cannot map weights {}", models.model_path))?
        };
        let model = m::model::Whisper::load(&vb, config.clone())
            .with_context(|| format!("invalid weights {}", models.model_path))?;

        let token = |name: &str| {
            tokenizer
                .token_to_id(name)
                .ok_or_else(|| anyhow!("scorer has no token {}", name))
        };
        let eot = token(m::EOT_TOKEN)?;
        let mut prompt = vec![token(m::SOT_TOKEN)?];
        if config.vocab_size >= MULTILINGUAL_VOCAB_SIZE {
            prompt.push(token("<|en|>")?);
        }
        prompt.push(token(m::TRANSCRIBE_TOKEN)?);
        prompt.push(token(m::NO_TIMESTAMPS_TOKEN)?);

        let word_starts = (0..=eot)
            .map(|id| {
                tokenizer
                    .id_to_token(id)
                    .map(|t| t.starts_with(WORD_START_MARKER))
                    .unwrap_or(false)
            })
            .collect();

        let mel_filters = mel_filters(m::SAMPLE_RATE as u32, m::N_FFT, config.num_mel_bins);
        let name = format!(
            "whisper:{}",
            std::path::Path::new(&models.model_path)
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| models.model_path.clone())
        );

        tracing::info!(
            model = %name,
            duration_secs = start_time.elapsed().as_secs_f64(),
            "Whisper model loaded"
        );

        Ok(Self {
            model,
            config,
            tokenizer,
            device,
            mel_filters,
            beam: BeamConfig {
                beam_width: models.beam_width,
                alpha: models.alpha,
                beta: models.beta,
                ..BeamConfig::default()
            },
            prompt,
            eot,
            word_starts,
            name,
        })
    }

    fn decode_chunk(&mut self, mel: &Tensor) -> Result<String> {
        let features = self.model.encoder.forward(mel, true)?;
        let mut search = BeamSearch::new(
            self.beam,
            self.eot,
            self.config.suppress_tokens.iter().copied(),
        );

        while !search.is_done() {
            let batch = search.live().len();
            let sequences: Vec<u32> = search
                .live()
                .iter()
                .flat_map(|h| self.prompt.iter().chain(h.tokens.iter()).copied())
                .collect();
            let seq_len = sequences.len() / batch;

            let tokens = Tensor::from_vec(sequences, (batch, seq_len), &self.device)?;
            let audio = if batch == 1 {
                features.clone()
            } else {
                Tensor::cat(&vec![&features; batch], 0)?
            };

            // All hypotheses share one length, so the whole batch is re-decoded each step.
            let hidden = self.model.decoder.forward(&tokens, &audio, true)?;
            let logits = self.model.decoder.final_linear(&hidden.i((.., seq_len - 1..))?)?;
            let logprobs = candle_nn::ops::log_softmax(&logits.squeeze(1)?, D::Minus1)?
                .to_vec2::<f32>()?;

            let word_starts = &self.word_starts;
            search.step(&logprobs, |t| word_starts.get(t as usize).copied().unwrap_or(false));
        }

        self.model.reset_kv_cache();

        let tokens = search.best();
        let text = self
            .tokenizer
            .decode(&tokens, true)
            .map_err(|e| anyhow!("detokenization failed: {}", e))?;
        Ok(text.trim().to_string())
    }
}

impl SpeechModel for WhisperModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn transcribe(&mut self, samples: &[i16]) -> Result<String> {
        let start_time = Instant::now();
        let pcm = pcm_to_float(samples);
        let n_mels = self.config.num_mel_bins;
        let mut texts = Vec::new();

        for (index, chunk) in pcm.chunks(m::N_SAMPLES).enumerate() {
            let mut padded = chunk.to_vec();
            padded.resize(m::N_SAMPLES, 0.0);

            let mel = m::audio::pcm_to_mel(&self.config, &padded, &self.mel_filters);
            let n_frames = mel.len() / n_mels;
            let mel = Tensor::from_vec(mel, (1, n_mels, n_frames), &self.device)?
                .narrow(2, 0, n_frames.min(m::N_FRAMES))?;

            let text = self.decode_chunk(&mel)?;
            tracing::debug!(chunk = index, chars = text.len(), "Decoded audio chunk");
            if !text.is_empty() {
                texts.push(text);
            }
        }

        let transcript = texts.join(" ");
        tracing::debug!(
            audio_secs = samples.len() as f64 / m::SAMPLE_RATE as f64,
            duration_secs = start_time.elapsed().as_secs_f64(),
            chars = transcript.len(),
            "Whisper transcription finished"
        );
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn models_config(dir: &std::path::Path) -> ModelsConfig {
        ModelsConfig {
            model_path: dir.join("model.safetensors").to_string_lossy().into_owned(),
            model_config_path: dir.join("config.json").to_string_lossy().into_owned(),
            scorer_path: dir.join("tokenizer.json").to_string_lossy().into_owned(),
            device: "cpu".to_string(),
            ..AppConfig::default().models
        }
    }

    #[test]
    fn test_missing_artifacts_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let err = WhisperModel::load(&models_config(dir.path())).err().unwrap();
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_unparsable_config_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), b"{not json").unwrap();
        let err = WhisperModel::load(&models_config(dir.path())).err().unwrap();
        assert!(err.to_string().contains("cannot parse model config"));
    }
}
