//! # Application State Management
//!
//! State shared by every HTTP handler.
//!
//! ## Key Pieces:
//! - **Configuration**: loaded once at startup and read-only afterwards
//! - **Engine cell**: a write-once slot the startup bootstrap fills; until then
//!   transcription requests get `ModelNotLoaded`
//! - **Pipeline**: upload staging, normalization and cleanup (cheap to clone)
//! - **Metrics**: request counters updated by the metrics middleware
//!
//! ## Thread Safety:
//! Handlers run on several worker threads at once. Metrics sit behind an
//! `Arc<RwLock<..>>`; a poisoned lock is recovered rather than propagated since
//! the counters stay meaningful after a panicking writer. The engine cell needs no
//! lock once set.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::pipeline::TranscriptionPipeline;
use crate::transcription::EngineHandle;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::OnceCell;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub pipeline: TranscriptionPipeline,
    engine: Arc<OnceCell<EngineHandle>>,
    pub start_time: Instant,
}

/// Request metrics collected by the metrics middleware.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Key: route pattern with method, e.g. "POST /upload-audio"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let pipeline = TranscriptionPipeline::from_config(&config.audio);
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            pipeline,
            engine: Arc::new(OnceCell::new()),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn corpus_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.corpus.dir)
    }

    /// Install the loaded engine. Returns `false` if one was already installed.
    pub fn install_engine(&self, engine: EngineHandle) -> bool {
        let name = engine.name().to_string();
        match self.engine.set(engine) {
            Ok(()) => {
                tracing::info!(model = %name, "Speech engine installed");
                true
            }
            Err(_) => {
                tracing::warn!(model = %name, "Speech engine already installed, ignoring");
                false
            }
        }
    }

    /// The engine, or `ModelNotLoaded` while startup is still running.
    pub fn engine(&self) -> AppResult<EngineHandle> {
        self.engine.get().cloned().ok_or(AppError::ModelNotLoaded)
    }

    pub fn is_model_loaded(&self) -> bool {
        self.engine.initialized()
    }

    pub fn active_transcriptions(&self) -> usize {
        self.pipeline.active_transcriptions()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    /// Record one finished request for `endpoint`.
    ///
    /// ## Parameters:
    /// - **endpoint**: method and route pattern ("GET /health")
    /// - **duration_ms**: time spent handling the request
    /// - **is_error**: 4xx/5xx response or a middleware error
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics, taken without holding the lock afterwards.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::engine::test_support::EchoModel;

    #[test]
    fn test_engine_is_missing_until_installed() {
        let state = AppState::new(AppConfig::default());
        assert!(!state.is_model_loaded());
        assert!(matches!(state.engine(), Err(AppError::ModelNotLoaded)));

        assert!(state.install_engine(EngineHandle::new(Box::new(EchoModel))));
        assert!(state.is_model_loaded());
        assert_eq!(state.engine().unwrap().name(), "echo");

        // Write-once.
        assert!(!state.install_engine(EngineHandle::new(Box::new(EchoModel))));
    }

    #[test]
    fn test_clones_share_engine_and_metrics() {
        let state = AppState::new(AppConfig::default());
        let clone = state.clone();

        clone.install_engine(EngineHandle::new(Box::new(EchoModel)));
        clone.increment_request_count();

        assert!(state.is_model_loaded());
        assert_eq!(state.get_metrics_snapshot().request_count, 1);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("POST /upload-audio", 100, false);
        state.record_endpoint_request("POST /upload-audio", 300, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /upload-audio"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 200.0);
        assert_eq!(metric.error_rate(), 0.5);
        assert_eq!(EndpointMetric::default().error_rate(), 0.0);
    }
}
