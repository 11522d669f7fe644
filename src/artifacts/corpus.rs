//! # Corpus Bootstrapper
//!
//! Ensures the reference audio corpus used by the sample endpoint exists locally.
//! When the corpus directory is missing, the `.tar.gz` archive is fetched (unless
//! already on disk) and unpacked into the extraction root.

use crate::artifacts::fetcher::ArtifactFetcher;
use crate::error::StartupError;
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

pub struct CorpusBootstrapper {
    fetcher: ArtifactFetcher,
}

impl CorpusBootstrapper {
    pub fn new(fetcher: ArtifactFetcher) -> Self {
        Self { fetcher }
    }

    /// Ensure `corpus_dir` exists.
    ///
    /// ## Parameters:
    /// - **corpus_dir**: directory whose existence marks the corpus as ready
    /// - **archive_url** / **archive_path**: where the archive comes from and is cached
    /// - **extract_dir**: root the archive is unpacked into; the archive's own prefix
    ///   must lead to `corpus_dir`
    pub async fn ensure(
        &self,
        corpus_dir: &Path,
        archive_url: &str,
        archive_path: &Path,
        extract_dir: &Path,
    ) -> Result<(), StartupError> {
        if corpus_dir.exists() {
            debug!(path = %corpus_dir.display(), "Corpus already present");
            return Ok(());
        }

        info!(path = %corpus_dir.display(), "Corpus missing, bootstrapping");

        self.fetcher
            .ensure(archive_url, archive_path)
            .await
            .map_err(|e| StartupError::Bootstrap(e.to_string()))?;

        let start_time = Instant::now();
        let archive = archive_path.to_path_buf();
        let root = extract_dir.to_path_buf();
        tokio::task::spawn_blocking(move || extract_tar_gz(&archive, &root))
            .await
            .map_err(|e| StartupError::Bootstrap(format!("extraction task failed: {}", e)))??;

        if !corpus_dir.exists() {
            return Err(StartupError::Bootstrap(format!(
                "archive {} did not contain {}",
                archive_path.display(),
                corpus_dir.display()
            )));
        }

        info!(
            path = %corpus_dir.display(),
            duration_secs = start_time.elapsed().as_secs_f64(),
            "Corpus extracted"
        );
        Ok(())
    }
}

/// Unpack a gzip-compressed tar archive into `dest`.
///
/// `tar` refuses entries that would escape `dest` (absolute paths, `..`).
fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<(), StartupError> {
    let describe = |what: &str, e: std::io::Error| {
        StartupError::Bootstrap(format!("{} {}: {}", what, archive.display(), e))
    };

    std::fs::create_dir_all(dest).map_err(|e| describe("cannot prepare extraction of", e))?;
    let file = File::open(archive).map_err(|e| describe("cannot open", e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.unpack(dest).map_err(|e| describe("cannot extract", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn corpus_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn bootstrapper() -> CorpusBootstrapper {
        CorpusBootstrapper::new(ArtifactFetcher::new(Duration::from_secs(5)).unwrap())
    }

    #[tokio::test]
    async fn test_fetches_and_extracts_missing_corpus() {
        let archive = corpus_archive(&[
            ("LibriSpeech/dev-clean/84/121123/84-121123-0000.flac", b"fLaC-one"),
            ("LibriSpeech/dev-clean/84/121123/84-121123-0001.flac", b"fLaC-two"),
        ]);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .expect(1)
            .mount(&server)
            .await;

        let data = tempfile::tempdir().unwrap();
        let corpus_dir = data.path().join("LibriSpeech/dev-clean");
        let archive_path = data.path().join("dev-clean.tar.gz");
        let url = format!("{}/dev-clean.tar.gz", server.uri());

        bootstrapper()
            .ensure(&corpus_dir, &url, &archive_path, data.path())
            .await
            .unwrap();

        let sample = corpus_dir.join("84/121123/84-121123-0000.flac");
        assert_eq!(std::fs::read(sample).unwrap(), b"fLaC-one");

        // Corpus present now: no second download.
        bootstrapper()
            .ensure(&corpus_dir, &url, &archive_path, data.path())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_existing_corpus_is_noop() {
        let data = tempfile::tempdir().unwrap();
        let corpus_dir = data.path().join("LibriSpeech/dev-clean");
        std::fs::create_dir_all(&corpus_dir).unwrap();

        bootstrapper()
            .ensure(
                &corpus_dir,
                "http://127.0.0.1:9/dev-clean.tar.gz",
                &data.path().join("dev-clean.tar.gz"),
                data.path(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cached_archive_is_extracted_without_download() {
        let data = tempfile::tempdir().unwrap();
        let archive_path = data.path().join("dev-clean.tar.gz");
        std::fs::write(
            &archive_path,
            corpus_archive(&[("LibriSpeech/dev-clean/1/1/1-1-0000.flac", b"fLaC")]),
        )
        .unwrap();
        let corpus_dir = data.path().join("LibriSpeech/dev-clean");

        bootstrapper()
            .ensure(&corpus_dir, "http://127.0.0.1:9/unused", &archive_path, data.path())
            .await
            .unwrap();
        assert!(corpus_dir.join("1/1/1-1-0000.flac").exists());
    }

    #[tokio::test]
    async fn test_download_failure_is_bootstrap_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let data = tempfile::tempdir().unwrap();
        let result = bootstrapper()
            .ensure(
                &data.path().join("LibriSpeech/dev-clean"),
                &format!("{}/dev-clean.tar.gz", server.uri()),
                &data.path().join("dev-clean.tar.gz"),
                data.path(),
            )
            .await;

        assert!(matches!(result, Err(StartupError::Bootstrap(_))));
    }

    #[tokio::test]
    async fn test_archive_without_corpus_dir_is_bootstrap_error() {
        let data = tempfile::tempdir().unwrap();
        let archive_path = data.path().join("other.tar.gz");
        std::fs::write(&archive_path, corpus_archive(&[("Other/readme.txt", b"hi")])).unwrap();

        let result = bootstrapper()
            .ensure(
                &data.path().join("LibriSpeech/dev-clean"),
                "http://127.0.0.1:9/unused",
                &archive_path,
                data.path(),
            )
            .await;

        assert!(matches!(result, Err(StartupError::Bootstrap(_))));
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_bootstrap_error() {
        let data = tempfile::tempdir().unwrap();
        let archive_path = data.path().join("dev-clean.tar.gz");
        std::fs::write(&archive_path, b"not gzip at all").unwrap();

        let result = bootstrapper()
            .ensure(
                &data.path().join("LibriSpeech/dev-clean"),
                "http://127.0.0.1:9/unused",
                &archive_path,
                data.path(),
            )
            .await;

        assert!(matches!(result, Err(StartupError::Bootstrap(_))));
    }
}
