//! HTTP image fetching on a tokio runtime.
//!
//! [`HttpImageSource`] performs one GET per request on a runtime handle and
//! reports the body through the request's [`Completion`]. [`HttpTileFetcher`]
//! builds such requests for TMS tile keys.

use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

use super::{AsyncRequest, Completion, FetchError, RequestSource};
use crate::cache::TileFetcher;
use crate::tile::TileKey;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Builds a reqwest client with the given per-request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| FetchError::Transport(format!("Failed to create HTTP client: {}", e)))
}

/// Fetches a URL and returns the body.
async fn fetch(client: &reqwest::Client, url: &str) -> Result<Bytes, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::Transport(format!("Request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    response
        .bytes()
        .await
        .map_err(|e| FetchError::Body(e.to_string()))
}

// =============================================================================
// HttpImageSource
// =============================================================================

/// Request source performing a single HTTP GET.
pub struct HttpImageSource {
    url: String,
    client: reqwest::Client,
    runtime: Handle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpImageSource {
    pub fn new(url: impl Into<String>, client: reqwest::Client, runtime: Handle) -> Self {
        Self {
            url: url.into(),
            client,
            runtime,
            task: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RequestSource for HttpImageSource {
    fn target(&self) -> &str {
        &self.url
    }

    fn start(&self, completion: Completion) -> bool {
        if self.url.is_empty() {
            return false;
        }

        let client = self.client.clone();
        let url = self.url.clone();
        let task = self.runtime.spawn(async move {
            match fetch(&client, &url).await {
                Ok(body) => completion.succeed(body),
                Err(error) => {
                    warn!(url = %url, error = %error, "Image fetch failed");
                    completion.fail(error);
                }
            }
        });
        *self.task.lock() = Some(task);
        true
    }

    fn abort(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

// =============================================================================
// HttpTileFetcher
// =============================================================================

/// Creates GET requests for `<base>/<level>/<col>/<row>.png`.
#[derive(Clone)]
pub struct HttpTileFetcher {
    base_url: String,
    client: reqwest::Client,
    runtime: Handle,
}

impl HttpTileFetcher {
    /// Creates a fetcher with the default timeout.
    pub fn new(base_url: impl Into<String>, runtime: Handle) -> Result<Self, FetchError> {
        Self::with_timeout(
            base_url,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            runtime,
        )
    }

    /// Creates a fetcher with a custom per-request timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
        runtime: Handle,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            base_url: base_url.into(),
            client: build_client(timeout)?,
            runtime,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of a tile image.
    pub fn tile_url(&self, key: &TileKey) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key.path())
    }
}

impl TileFetcher for HttpTileFetcher {
    fn request(&self, key: &TileKey) -> AsyncRequest {
        AsyncRequest::new(HttpImageSource::new(
            self.tile_url(key),
            self.client.clone(),
            self.runtime.clone(),
        ))
    }
}
