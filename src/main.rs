//! # Speech-to-Text Service - Main Application Entry Point
//!
//! HTTP service that accepts audio uploads in common formats, normalizes them to
//! 16kHz mono 16-bit PCM with ffmpeg and transcribes them with a Whisper model.
//!
//! ## Startup:
//! 1. Load and validate configuration (defaults, `config.toml`, `APP_*` variables)
//! 2. Start the startup bootstrap in the background (artifacts, corpus, model)
//! 3. Bind the HTTP server; `/health` answers immediately, transcription
//!    endpoints answer 503 until the engine is installed
//!
//! A failed bootstrap stops the server and the process exits with an error.
//!
//! ## Application Architecture:
//! - **artifacts**: fetch-if-absent downloads and corpus extraction
//! - **audio**: staging guards, WAV reading, ffmpeg normalization
//! - **transcription**: engine handle, Whisper backend, beam search
//! - **pipeline**: upload → normalize → transcribe → cleanup
//! - **bootstrap**: one-shot startup sequence
//! - **config / state / error**: configuration, shared state, error types
//! - **health / handlers / middleware**: HTTP surface

mod artifacts;
mod audio;
mod bootstrap;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use crate::config::AppConfig;
use crate::error::StartupError;
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal handlers; polled by `wait_for_shutdown`.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting speech-to-text-service v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    std::fs::create_dir_all(config.audio.staging_path()).with_context(|| {
        format!("cannot create staging directory {}", config.audio.staging_dir)
    })?;

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    let bootstrap_task = tokio::spawn(bootstrap::run(app_state.clone()));

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse registration order for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/upload-audio", web::post().to(handlers::upload_audio))
            .route("/sample-audio", web::get().to(handlers::sample_audio))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
            .default_service(web::to(handlers::not_found))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    let outcome = tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
            Ok(())
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
            Ok(())
        }
        e = bootstrap_failure(bootstrap_task) => {
            error!(error = %e, "Startup bootstrap failed, stopping server");
            server_handle.stop(false).await;
            Err(e)
        }
    };

    info!("Server stopped");
    outcome
}

/// Initialize tracing with `RUST_LOG`, defaulting to
/// `speech_to_text_service=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech_to_text_service=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the global shutdown flag.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

/// Resolves only if the bootstrap fails; a successful bootstrap never resolves.
async fn bootstrap_failure(task: JoinHandle<Result<(), StartupError>>) -> anyhow::Error {
    match task.await {
        Ok(Ok(())) => std::future::pending().await,
        Ok(Err(e)) => e.into(),
        Err(e) => anyhow::anyhow!("bootstrap task failed: {}", e),
    }
}
