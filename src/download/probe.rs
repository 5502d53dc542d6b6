//! Resource existence probing.
//!
//! A probe asks whether an address currently serves content without
//! transferring the body. Probes are answers, not operations: every failure
//! mode collapses to "not found".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::client::HttpClient;
use super::constants::PROBE_TIMEOUT_SECS;
use super::rate_limiter::{RateLimiter, extract_domain};

/// Answers whether an address exists.
///
/// Implementations must never error and never retry; discovery treats any
/// failure as absence. Implementations are shared across concurrent probe
/// tasks.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns `true` only if `address` answered with a success status.
    async fn exists(&self, address: &str) -> bool;
}

/// HEAD-based prober backed by the shared [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: HttpClient,
    timeout: Duration,
    limiter: Option<Arc<RateLimiter>>,
}

impl HttpProber {
    /// Creates a prober with the default 5 second timeout and no rate limiting.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
            limiter: None,
        }
    }

    /// Overrides the per-probe timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Routes every probe through `limiter`, keyed by host.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn exists(&self, address: &str) -> bool {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(&extract_domain(address)).await;
        }
        self.client.head_ok(address, self.timeout).await
    }
}
