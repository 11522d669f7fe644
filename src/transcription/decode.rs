//! # Beam Search
//!
//! Backend-independent beam search over per-step log-probabilities. The Whisper
//! backend feeds it one row of log-probabilities per live hypothesis and asks for
//! the next set of hypotheses; nothing here touches tensors.
//!
//! ## Scoring:
//! `score = logprob / len^alpha + beta * words`
//! - **alpha**: length normalization exponent (0 disables it)
//! - **beta**: bonus per emitted word; word boundaries come from the vocabulary

use std::cmp::Ordering;
use std::collections::HashSet;

/// Decoding parameters for one search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamConfig {
    pub beam_width: usize,
    pub alpha: f32,
    pub beta: f32,
    pub max_tokens: usize,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            beam_width: 5,
            alpha: 1.0,
            beta: 0.0,
            max_tokens: 224,
        }
    }
}

/// A partial (or finished) transcription candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    /// Emitted text tokens, prompt excluded
    pub tokens: Vec<u32>,
    /// Sum of token log-probabilities
    pub logprob: f32,
    /// Number of tokens that start a new word
    pub words: usize,
}

impl Hypothesis {
    fn empty() -> Self {
        Self {
            tokens: Vec::new(),
            logprob: 0.0,
            words: 0,
        }
    }

    pub fn score(&self, config: &BeamConfig) -> f32 {
        let len = self.tokens.len().max(1) as f32;
        self.logprob / len.powf(config.alpha) + config.beta * self.words as f32
    }
}

/// Beam search state for one audio chunk.
pub struct BeamSearch {
    config: BeamConfig,
    eot: u32,
    suppressed: HashSet<u32>,
    live: Vec<Hypothesis>,
    finished: Vec<Hypothesis>,
    steps: usize,
}

impl BeamSearch {
    /// Start a search with a single empty hypothesis.
    ///
    /// Tokens above `eot` (timestamps, task markers) are never candidates, nor is
    /// anything in `suppressed`.
    pub fn new(config: BeamConfig, eot: u32, suppressed: impl IntoIterator<Item = u32>) -> Self {
        Self {
            config: BeamConfig {
                beam_width: config.beam_width.max(1),
                ..config
            },
            eot,
            suppressed: suppressed.into_iter().collect(),
            live: vec![Hypothesis::empty()],
            finished: Vec::new(),
            steps: 0,
        }
    }

    /// Hypotheses that still need another decoder step, in batch order.
    pub fn live(&self) -> &[Hypothesis] {
        &self.live
    }

    pub fn is_done(&self) -> bool {
        self.live.is_empty()
            || self.finished.len() >= self.config.beam_width
            || self.steps >= self.config.max_tokens
    }

    /// Advance every live hypothesis by one token.
    ///
    /// `logprobs[i]` is the log-probability row for `live()[i]`.
    /// `starts_word(token)` tells whether a token opens a new word.
    pub fn step<F>(&mut self, logprobs: &[Vec<f32>], starts_word: F)
    where
        F: Fn(u32) -> bool,
    {
        let width = self.config.beam_width;
        let mut candidates: Vec<(Hypothesis, bool)> = Vec::new();

        for (hyp, row) in self.live.iter().zip(logprobs) {
            for (token, logprob) in self.top_tokens(row, width) {
                let is_eot = token == self.eot;
                let mut next = hyp.clone();
                next.logprob += logprob;
                if !is_eot {
                    if hyp.tokens.is_empty() || starts_word(token) {
                        next.words += 1;
                    }
                    next.tokens.push(token);
                }
                candidates.push((next, is_eot));
            }
        }

        let config = self.config;
        candidates.sort_by(|a, b| compare_scores(&b.0, &a.0, &config));

        self.live.clear();
        for (hyp, is_eot) in candidates.into_iter().take(width) {
            if is_eot {
                self.finished.push(hyp);
            } else {
                self.live.push(hyp);
            }
        }

        self.steps += 1;
    }

    /// Best `k` eligible tokens of a row, highest log-probability first.
    fn top_tokens(&self, row: &[f32], k: usize) -> Vec<(u32, f32)> {
        let limit = row.len().min(self.eot as usize + 1);
        let mut eligible: Vec<(u32, f32)> = row[..limit]
            .iter()
            .enumerate()
            .map(|(id, lp)| (id as u32, *lp))
            .filter(|(id, lp)| lp.is_finite() && !self.suppressed.contains(id))
            .collect();

        eligible.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        eligible.truncate(k);
        eligible
    }

    /// Tokens of the best hypothesis. Unfinished hypotheses only count when
    /// nothing reached end-of-text.
    pub fn best(self) -> Vec<u32> {
        let config = self.config;
        let pool = if self.finished.is_empty() {
            self.live
        } else {
            self.finished
        };

        pool.into_iter()
            .max_by(|a, b| compare_scores(a, b, &config))
            .map(|h| h.tokens)
            .unwrap_or_default()
    }
}

fn compare_scores(a: &Hypothesis, b: &Hypothesis, config: &BeamConfig) -> Ordering {
    a.score(config)
        .partial_cmp(&b.score(config))
        .unwrap_or(Ordering::Equal)
}
