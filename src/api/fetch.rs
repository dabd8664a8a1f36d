//! Descriptor fetcher
//!
//! Downloads remote `.torrent` descriptors to a file. Used both to resolve
//! `http(s)://` descriptors before a session starts and to save a release's
//! descriptor next to the user's other downloads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Errors from descriptor downloads
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking GET-to-file capability
#[async_trait]
pub trait DescriptorFetcher: Send + Sync {
    /// Download `url` into `destination`, returning the written path
    async fn fetch(&self, url: &str, destination: &Path) -> Result<PathBuf, FetchError>;
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DescriptorFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<PathBuf, FetchError> {
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        debug!(url, bytes = written, dest = %destination.display(), "Descriptor fetched");
        Ok(destination.to_path_buf())
    }
}

/// Save a remote descriptor as `<output_dir>/<name>.torrent`.
///
/// The output directory is created if needed. Path separators in `name` are
/// replaced so the file always lands directly inside `output_dir`.
pub async fn save_descriptor(
    fetcher: &dyn DescriptorFetcher,
    url: &str,
    output_dir: &Path,
    name: &str,
) -> Result<PathBuf, FetchError> {
    let output_dir = if output_dir.is_absolute() {
        output_dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(output_dir)
    };
    tokio::fs::create_dir_all(&output_dir).await?;

    let destination = output_dir.join(format!("{}.torrent", sanitize_file_name(name)));
    fetcher.fetch(url, &destination).await
}

/// Make a release name safe to use as a single file name
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "release".to_string(),
        _ => cleaned,
    }
}
