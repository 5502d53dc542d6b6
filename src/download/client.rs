//! HTTP client wrapper shared by probing, fetching and catalog discovery.
//!
//! This module provides the `HttpClient` struct which is built once per run
//! and passed explicitly to every component that talks to the network. It
//! handles streaming page transfers with proper timeout configuration and
//! error mapping.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{BROWSER_USER_AGENT, CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;

/// Error raised while constructing the shared HTTP client.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    /// reqwest rejected the builder configuration (TLS backend, proxy settings).
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// HTTP client for probing and downloading pages with streaming support.
///
/// This client is designed to be created once and reused for every request
/// in a run, taking advantage of connection pooling. Every request carries a
/// browser User-Agent; several mirror hosts reject unknown agents.
///
/// # Example
///
/// ```no_run
/// use manga_core::download::HttpClient;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new()?;
/// let bytes = client
///     .fetch_to("https://scans.example.us/manga/x/0001-001.png", Path::new("./0001-001.png.part"))
///     .await?;
/// println!("wrote {bytes} bytes");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 10 seconds
    /// - Read timeout: 15 seconds
    /// - Gzip decompression: enabled
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, ClientBuildError> {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if the client cannot be built.
    #[instrument(level = "debug")]
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, ClientBuildError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(BROWSER_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    /// Returns whether `url` answers a HEAD request with a 2xx status.
    ///
    /// Redirects are followed. Any transport error, timeout or non-2xx status
    /// yields `false`; this never errors and never retries.
    #[instrument(level = "trace", skip(self))]
    pub async fn head_ok(&self, url: &str, timeout: Duration) -> bool {
        match self.client.head(url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                debug!(url, error = %error, "probe request failed");
                false
            }
        }
    }

    /// Downloads `url` into `file_path`, streaming the body to disk.
    ///
    /// The file is created (or truncated) before streaming and removed again
    /// if the transfer fails part way.
    ///
    /// # Returns
    ///
    /// The number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The URL is invalid
    /// - The request fails (network error, timeout, truncated body)
    /// - The server returns a non-2xx status
    /// - Writing to disk fails
    #[instrument(level = "debug", skip(self, file_path), fields(path = %file_path.display()))]
    pub async fn fetch_to(&self, url: &str, file_path: &Path) -> Result<u64, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let mut file = File::create(file_path)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;

        let stream_result = stream_to_file(&mut file, response, url, file_path).await;
        if stream_result.is_err() {
            debug!(path = %file_path.display(), "cleaning up partial file after error");
            drop(file);
            let _ = tokio::fs::remove_file(file_path).await;
        }

        stream_result
    }

    /// Returns a reference to the underlying reqwest client.
    ///
    /// Catalog and rendered-site discovery issue their own JSON and HTML
    /// requests through this.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn map_reqwest_error(url: &str, error: &reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

/// Streams response body to file, returning bytes written.
///
/// This is extracted to enable cleanup on error in the caller.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| map_reqwest_error(url, &e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    // Ensure all data is flushed to disk
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}
