use std::path::{Path, PathBuf};

use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("download request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} returned HTTP {status}")]
    Status { status: u16, url: String },
    #[error("failed to write file: {0}")]
    Io(#[from] std::io::Error),
}

/// Replaces characters that are not allowed in file names.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `{dir}/{title}/{episode}.mp4`
pub fn episode_path(dir: &Path, title: &str, episode: &str) -> PathBuf {
    dir.join(sanitize_file_name(title))
        .join(format!("{}.mp4", sanitize_file_name(episode)))
}

/// Streams files to disk with the same identification the player sends.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    referrer: String,
}

impl Downloader {
    pub fn new(user_agent: &str, referrer: &str) -> Self {
        Self {
            client: crate::sources::http_client(user_agent),
            referrer: referrer.to_string(),
        }
    }

    /// Downloads `url` to `dest`, reporting (bytes so far, total if known).
    ///
    /// Data goes to a `.part` file that is renamed once complete.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        mut on_progress: impl FnMut(u64, Option<u64>),
    ) -> Result<u64, DownloadError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!(url = %url, dest = %dest.display(), "starting download");
        let mut response = self
            .client
            .get(url)
            .header("Referer", &self.referrer)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length();
        let partial = dest.with_extension("part");
        let result = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut written = 0u64;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
                on_progress(written, total);
            }
            file.flush().await?;
            drop(file);
            tokio::fs::rename(&partial, dest).await?;
            Ok::<_, DownloadError>(written)
        }
        .await;

        match result {
            Ok(written) => {
                info!(dest = %dest.display(), bytes = written, "download complete");
                Ok(written)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), error = %rm, "no partial file to remove");
                }
                Err(e)
            }
        }
    }
}
