//! # Startup Bootstrap
//!
//! Runs once in a background task while the HTTP server is already answering
//! `/health`:
//! 1. Fetch the model, model configuration and scorer if absent
//! 2. Make sure the reference corpus is extracted
//! 3. Load the engine and install it into the application state
//!
//! Any failure is returned to `main`, which stops the server.

use crate::artifacts::{ArtifactFetcher, CorpusBootstrapper};
use crate::error::StartupError;
use crate::state::AppState;
use crate::transcription::EngineHandle;
use std::path::Path;
use std::time::Instant;
use tracing::info;

pub async fn run(state: AppState) -> Result<(), StartupError> {
    let start_time = Instant::now();
    let config = state.get_config();
    let fetcher = ArtifactFetcher::new(config.download_timeout())?;

    let models = &config.models;
    for (url, path) in [
        (&models.model_url, &models.model_path),
        (&models.model_config_url, &models.model_config_path),
        (&models.scorer_url, &models.scorer_path),
    ] {
        fetcher.ensure(url, Path::new(path)).await?;
    }

    let corpus = &config.corpus;
    CorpusBootstrapper::new(fetcher)
        .ensure(
            Path::new(&corpus.dir),
            &corpus.archive_url,
            Path::new(&corpus.archive_path),
            Path::new(&corpus.extract_dir),
        )
        .await?;

    let engine = EngineHandle::load(models).await?;
    state.install_engine(engine);

    info!(
        duration_secs = start_time.elapsed().as_secs_f64(),
        "Startup bootstrap finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, data: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        let local = |name: &str| data.join(name).to_string_lossy().into_owned();
        config.models.model_url = format!("{}/model.safetensors", server.uri());
        config.models.model_path = local("model/model.safetensors");
        config.models.model_config_url = format!("{}/config.json", server.uri());
        config.models.model_config_path = local("model/config.json");
        config.models.scorer_url = format!("{}/tokenizer.json", server.uri());
        config.models.scorer_path = local("model/tokenizer.json");
        config.models.device = "cpu".to_string();
        config.corpus.dir = local("LibriSpeech/dev-clean");
        config.corpus.archive_url = format!("{}/dev-clean.tar.gz", server.uri());
        config.corpus.archive_path = local("dev-clean.tar.gz");
        config.corpus.extract_dir = local("");
        config.download.timeout_secs = 5;
        config
    }

    #[tokio::test]
    async fn test_download_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let data = tempfile::tempdir().unwrap();
        let state = AppState::new(config_for(&server, data.path()));

        let result = run(state.clone()).await;
        assert!(matches!(result, Err(StartupError::Download { .. })));
        assert!(!state.is_model_loaded());
        assert!(!data.path().join("model/model.safetensors").exists());
    }

    #[tokio::test]
    async fn test_unparsable_artifacts_are_model_load_error() {
        let server = MockServer::start().await;
        for (route, body) in [
            ("/model.safetensors", "not weights"),
            ("/config.json", "{not json"),
            ("/tokenizer.json", "{}"),
        ] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .expect(1)
                .mount(&server)
                .await;
        }

        let data = tempfile::tempdir().unwrap();
        let config = config_for(&server, data.path());
        std::fs::create_dir_all(&config.corpus.dir).unwrap();
        let state = AppState::new(config);

        let result = run(state.clone()).await;
        assert!(matches!(result, Err(StartupError::ModelLoad(_))));
        assert!(!state.is_model_loaded());
        // Artifacts stay cached for the next start.
        assert!(data.path().join("model/config.json").exists());
    }
}
