use crate::{error::AppError, state::AppState};
use actix_multipart::Multipart;
use actix_web::{http::header::CONTENT_LENGTH, web, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;

/// ## Endpoint: `POST /upload-audio`
///
/// ## Request:
/// Multipart form data; the first part carrying a filename is the audio file.
///
/// ## Response:
/// ```json
/// { "text": "hello world", "filename": "meeting.mp3" }
/// ```
///
/// ## Errors:
/// 400 unsupported extension or no file, 413 too large, 500 conversion or
/// inference failure, 503 while the model is still loading. The extension is
/// checked before readiness, so a bad upload is a 400 even during startup.
pub async fn upload_audio(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    while let Some(item) = payload.next().await {
        let field = item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let Some(filename) = filename else {
            continue;
        };

        state.pipeline.check_extension(&filename)?;
        let engine = state.engine()?;

        // Size announced for this part only; the request Content-Length also
        // counts boundaries and other fields.
        let declared_len = field
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        let result = state
            .pipeline
            .handle_upload(&engine, &filename, field, declared_len)
            .await?;
        return Ok(HttpResponse::Ok().json(result));
    }

    Err(AppError::BadRequest("No file provided".to_string()))
}

/// ## Endpoint: `GET /sample-audio`
///
/// Transcribes the first audio file of the reference corpus, a quick end-to-end
/// check that needs no upload.
pub async fn sample_audio(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let engine = state.engine()?;

    match state
        .pipeline
        .transcribe_sample(&engine, &state.corpus_dir())
        .await?
    {
        Some(sample) => Ok(HttpResponse::Ok().json(sample)),
        None => Ok(HttpResponse::Ok().json(json!({ "error": "no audio files found" }))),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::audio::normalizer::test_support::copying_decoder;
    use crate::audio::wav::test_support::write_pcm16;
    use crate::audio::wav::WavFormat;
    use crate::config::AppConfig;
    use crate::transcription::engine::test_support::EchoModel;
    use crate::transcription::EngineHandle;
    use actix_web::http::header::CONTENT_TYPE;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    const BOUNDARY: &str = "speech-boundary";

    struct Fixture {
        root: tempfile::TempDir,
        state: AppState,
    }

    fn fixture(max_upload_bytes: u64) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.audio.staging_dir = root.path().join("uploads").to_string_lossy().into_owned();
        config.audio.ffmpeg_bin = copying_decoder(root.path()).to_string_lossy().into_owned();
        config.audio.max_upload_bytes = max_upload_bytes;
        config.corpus.dir = root.path().join("corpus").to_string_lossy().into_owned();
        Fixture {
            state: AppState::new(config),
            root,
        }
    }

    fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/upload-audio")
            .insert_header((
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    fn wav_bytes(dir: &std::path::Path, samples: &[i16]) -> Vec<u8> {
        let path = dir.join("source.wav");
        write_pcm16(&path, WavFormat::new(16000, 1, 16), samples);
        std::fs::read(path).unwrap()
    }

    macro_rules! service {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .route("/upload-audio", web::post().to(upload_audio))
                    .route("/sample-audio", web::get().to(sample_audio)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_upload_before_model_loaded_is_503() {
        let fx = fixture(1 << 20);
        let app = service!(fx.state);

        let body = multipart(&[("file", Some("a.wav"), b"x".as_slice())]);
        let res = test::call_service(&app, upload_request(body).to_request()).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        let req = test::TestRequest::get().uri("/sample-audio").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_unsupported_upload_during_startup_is_400() {
        let fx = fixture(1 << 20);
        let app = service!(fx.state);

        let body = multipart(&[("file", Some("notes.txt"), b"hello".as_slice())]);
        let res = test::call_service(&app, upload_request(body).to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_file_of_exactly_max_size_is_accepted() {
        let scratch = tempfile::tempdir().unwrap();
        let audio = wav_bytes(scratch.path(), &[5; 490]);
        let fx = fixture(audio.len() as u64);
        fx.state.install_engine(EngineHandle::new(Box::new(EchoModel)));
        let app = service!(fx.state);

        let body = multipart(&[
            ("note", None, b"multipart overhead".as_slice()),
            ("file", Some("exact.wav"), audio.as_slice()),
        ]);
        assert!(body.len() > audio.len());
        let res = test::call_service(&app, upload_request(body).to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);

        let json: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(json["filename"], "exact.wav");
        assert_eq!(json["text"], "490 samples");
    }

    #[actix_web::test]
    async fn test_upload_is_transcribed() {
        let fx = fixture(1 << 20);
        fx.state.install_engine(EngineHandle::new(Box::new(EchoModel)));
        let app = service!(fx.state);
        let audio = wav_bytes(fx.root.path(), &[3; 1600]);

        let body = multipart(&[
            ("note", None, b"ignored".as_slice()),
            ("file", Some("clip.wav"), audio.as_slice()),
        ]);
        let res = test::call_service(&app, upload_request(body).to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);

        let json: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(json["text"], "1600 samples");
        assert_eq!(json["filename"], "clip.wav");
    }

    #[actix_web::test]
    async fn test_unsupported_upload_is_400() {
        let fx = fixture(1 << 20);
        fx.state.install_engine(EngineHandle::new(Box::new(EchoModel)));
        let app = service!(fx.state);

        let body = multipart(&[("file", Some("notes.txt"), b"hello".as_slice())]);
        let res = test::call_service(&app, upload_request(body).to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let json: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(json["error"]["type"], "unsupported_format");
    }

    #[actix_web::test]
    async fn test_missing_file_is_400() {
        let fx = fixture(1 << 20);
        fx.state.install_engine(EngineHandle::new(Box::new(EchoModel)));
        let app = service!(fx.state);

        let body = multipart(&[("note", None, b"hi".as_slice())]);
        let res = test::call_service(&app, upload_request(body).to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_413() {
        let fx = fixture(1024);
        fx.state.install_engine(EngineHandle::new(Box::new(EchoModel)));
        let app = service!(fx.state);

        let body = multipart(&[("file", Some("big.wav"), [0u8; 4096].as_slice())]);
        let res = test::call_service(&app, upload_request(body).to_request()).await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[actix_web::test]
    async fn test_sample_with_empty_corpus() {
        let fx = fixture(1 << 20);
        fx.state.install_engine(EngineHandle::new(Box::new(EchoModel)));
        let app = service!(fx.state);

        let req = test::TestRequest::get().uri("/sample-audio").to_request();
        let json: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(json, serde_json::json!({ "error": "no audio files found" }));
    }

    #[actix_web::test]
    async fn test_sample_is_transcribed() {
        let fx = fixture(1 << 20);
        fx.state.install_engine(EngineHandle::new(Box::new(EchoModel)));
        let sample = fx.root.path().join("corpus/19/198/19-198-0000.wav");
        std::fs::create_dir_all(sample.parent().unwrap()).unwrap();
        write_pcm16(&sample, WavFormat::new(16000, 1, 16), &[1; 480]);
        let app = service!(fx.state);

        let req = test::TestRequest::get().uri("/sample-audio").to_request();
        let json: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(json["transcript"], "480 samples");
        assert!(json["sample_file"].as_str().unwrap().ends_with("19-198-0000.wav"));
    }
}
