//! Remote retrieval of assets

use crate::error::DownloadError;
use async_trait::async_trait;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Fetches a remote resource into a local file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` into `destination`, replacing any existing file
    async fn download(&self, url: &Url, destination: &Path) -> Result<(), DownloadError>;
}

/// HTTP(S) downloader backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    /// Downloader with the default request timeout (5 minutes)
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(300))
    }

    /// Downloader with a custom request timeout
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &Url, destination: &Path) -> Result<(), DownloadError> {
        debug!(%url, destination = %destination.display(), "Downloading asset");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DownloadError::new(url.as_str(), e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DownloadError::new(url.as_str(), e.to_string()))?;

        tokio::fs::write(destination, &bytes)
            .await
            .map_err(|e| DownloadError::new(url.as_str(), e.to_string()))?;

        debug!(%url, size = bytes.len(), "Download complete");
        Ok(())
    }
}

/// Parse a plan reference as a remote location
///
/// Only `http` and `https` references are downloadable.
#[must_use]
pub fn remote_url(reference: &str) -> Option<Url> {
    Url::parse(reference)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Local file name for a downloaded asset: the last non-empty path segment
#[must_use]
pub fn download_file_name(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
}

/// Location of a remote asset relative to its kind folder
///
/// Mirrors host, path and query so that distinct URLs never share a file;
/// the file name stays the last path segment.
#[must_use]
pub fn download_location(url: &Url) -> Option<PathBuf> {
    let file_name = download_file_name(url)?;

    let mut location = PathBuf::new();
    if let Some(host) = url.host_str() {
        match url.port() {
            Some(port) => location.push(portable_name(&format!("{host}_{port}"))),
            None => location.push(portable_name(host)),
        }
    }
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    if let Some((_, folders)) = segments.split_last() {
        for folder in folders {
            location.push(portable_name(folder));
        }
    }
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        location.push(portable_name(query));
    }
    location.push(portable_name(&file_name));
    Some(location)
}

fn portable_name(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '%') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
