//! # Artifact Fetcher
//!
//! Makes sure a remote artifact (model weights, scorer, corpus archive) exists at a
//! well-known local path. A path's existence means "already fetched"; there is no
//! versioning.
//!
//! ## Download Process:
//! 1. Skip entirely if the destination already exists and is non-empty
//! 2. GET the URL and require a success status
//! 3. Stream the body into `<dest>.part`, then flush and sync it
//! 4. Rename `<dest>.part` over `<dest>` (readers never see a partial file)
//!
//! Any failure removes the `.part` file. There is no retry; the startup sequence
//! decides what a failed download means.

use crate::error::StartupError;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Downloads artifacts over HTTP(S).
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
    /// Longest wait for the response head or for any single body chunk
    timeout: Duration,
}

impl ArtifactFetcher {
    pub fn new(timeout: Duration) -> Result<Self, StartupError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StartupError::Download {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, timeout })
    }

    /// Ensure `dest` exists, downloading it from `url` if it does not.
    ///
    /// Idempotent: when `dest` is already present no request is made.
    pub async fn ensure(&self, url: &str, dest: &Path) -> Result<(), StartupError> {
        match fs::metadata(dest).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                debug!(path = %dest.display(), "Artifact already present");
                return Ok(());
            }
            Ok(meta) if meta.is_file() => {
                warn!(path = %dest.display(), "Artifact is empty, fetching again");
            }
            _ => {}
        }

        let part = part_path(dest);
        let result = self.download(url, dest, &part).await;
        if result.is_err() {
            if let Err(e) = fs::remove_file(&part).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %part.display(), error = %e, "Failed to remove partial download");
                }
            }
        }
        result
    }

    async fn download(&self, url: &str, dest: &Path, part: &Path) -> Result<(), StartupError> {
        let failed = |reason: String| StartupError::Download {
            url: url.to_string(),
            reason,
        };

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| failed(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        info!(url = %url, dest = %dest.display(), "Downloading artifact");

        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| failed(format!("no response within {}s", self.timeout.as_secs())))?
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {}", status)));
        }

        let total_size = response.content_length();
        let mut file = fs::File::create(part)
            .await
            .map_err(|e| failed(format!("cannot create {}: {}", part.display(), e)))?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_percent = 0;

        loop {
            let next = tokio::time::timeout(self.timeout, stream.next())
                .await
                .map_err(|_| failed(format!("transfer stalled for {}s", self.timeout.as_secs())))?;
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;

            file.write_all(&chunk)
                .await
                .map_err(|e| failed(format!("write failed: {}", e)))?;
            downloaded += chunk.len() as u64;

            if let Some(total) = total_size.filter(|t| *t > 0) {
                let percent = downloaded * 100 / total;
                if percent >= last_percent + 10 {
                    last_percent = percent;
                    debug!(url = %url, percent, "Download progress");
                }
            }
        }

        if downloaded == 0 {
            return Err(failed("empty response body".to_string()));
        }

        file.flush().await.map_err(|e| failed(format!("flush failed: {}", e)))?;
        file.sync_all().await.map_err(|e| failed(format!("sync failed: {}", e)))?;
        drop(file);

        fs::rename(part, dest)
            .await
            .map_err(|e| failed(format!("cannot move into place: {}", e)))?;

        info!(path = %dest.display(), bytes = downloaded, "Artifact downloaded");
        Ok(())
    }
}

/// `<dest>.part`, a sibling of `dest` so the final rename stays on one filesystem.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
