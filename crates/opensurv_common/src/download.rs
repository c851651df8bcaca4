//! Release archive download.
//!
//! The body is streamed to `<dest>.part` and renamed into place only after
//! the last chunk is synced, so `dest` is never a truncated archive.

use crate::error::{UpdateError, UpdateResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ArtifactDownloader {
    user_agent: String,
    timeout: Duration,
}

impl Default for ArtifactDownloader {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOAD_TIMEOUT)
    }
}

impl ArtifactDownloader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            user_agent: format!("opensurv-manager/{}", crate::VERSION),
            timeout,
        }
    }

    /// Download `url` to `dest`, overwriting it. Returns false on any failure.
    pub async fn download(&self, url: &str, dest: &Path) -> bool {
        match self.try_download(url, dest).await {
            Ok(bytes) => {
                info!("Downloaded {} bytes from {} to {}", bytes, url, dest.display());
                true
            }
            Err(e) => {
                warn!("Download of {} failed: {}", url, e);
                false
            }
        }
    }

    /// Download `url` to `dest`, returning the number of bytes written
    pub async fn try_download(&self, url: &str, dest: &Path) -> UpdateResult<u64> {
        let part = part_path(dest);
        let result = tokio::time::timeout(self.timeout, self.stream_to(url, &part))
            .await
            .unwrap_or_else(|_| {
                Err(UpdateError::Network(format!(
                    "download timed out after {}s",
                    self.timeout.as_secs()
                )))
            });

        match result {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::rename(&part, dest).await {
                    let _ = tokio::fs::remove_file(&part).await;
                    return Err(UpdateError::fs(dest, e));
                }
                Ok(bytes)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn stream_to(&self, url: &str, part: &Path) -> UpdateResult<u64> {
        let client = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .build()?;

        let mut response = client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(UpdateError::Network(format!(
                "Download failed: {} - {}",
                url,
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| UpdateError::fs(part, e))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk)
                .await
                .map_err(|e| UpdateError::fs(part, e))?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(|e| UpdateError::fs(part, e))?;
        file.sync_all().await.map_err(|e| UpdateError::fs(part, e))?;
        Ok(written)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
