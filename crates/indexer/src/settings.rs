use std::time::Duration;

/// Which upstream the client is currently talking to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SourceKind {
    Primary,
    Fallback,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

/// Throughput tuning for one upstream. Selected whenever the active source
/// changes and applied to every subsequent fetch; callers take a snapshot
/// per tick so settings never change under them mid-batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceSettings {
    /// Blocks fetched per pipeline tick.
    pub batch_size: usize,
    /// Concurrent requests within one chunk.
    pub max_concurrent: usize,
    /// Minimum delay before each request when rate limiting is on. Doubles
    /// with consecutive upstream errors.
    pub min_request_delay: Duration,
    /// Pause between chunks of one batch.
    pub batch_delay: Duration,
    /// Whether to throttle and back off at all. The private indexer takes
    /// requests as fast as we can issue them.
    pub rate_limited: bool,
    /// Cap on full transaction fetches per block.
    pub tx_fetch_limit: usize,
    pub request_timeout: Duration,
}

impl SourceSettings {
    /// Aggressive profile for the private local indexer.
    pub fn primary() -> Self {
        Self {
            batch_size: 50,
            max_concurrent: 10,
            min_request_delay: Duration::from_millis(25),
            batch_delay: Duration::from_millis(100),
            rate_limited: false,
            tx_fetch_limit: 200,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Conservative profile for the public explorer.
    pub fn fallback() -> Self {
        Self {
            batch_size: 10,
            max_concurrent: 2,
            min_request_delay: Duration::from_millis(500),
            batch_delay: Duration::from_secs(2),
            rate_limited: true,
            tx_fetch_limit: 50,
            request_timeout: Duration::from_secs(30),
        }
    }
}
