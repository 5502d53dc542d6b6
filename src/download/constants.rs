//! Constants for the download module (timeouts, rate limiting, naming).

use std::time::Duration;

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default HTTP read timeout for page transfers (15 seconds per attempt).
pub const READ_TIMEOUT_SECS: u64 = 15;

/// Default timeout for metadata-only existence probes (5 seconds).
pub const PROBE_TIMEOUT_SECS: u64 = 5;

/// Warning threshold for cumulative rate limit delay per key (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Suffix for in-progress transfers; renamed away once the body is complete.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Browser User-Agent sent by every request; several mirror hosts reject
/// unknown agents.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
