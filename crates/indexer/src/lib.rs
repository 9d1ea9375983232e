//! Upstream data source abstraction. Two indexer implementations (the
//! private v1 API and the public v2 explorer) normalize to one block shape;
//! `IndexerClient` layers retries, throttling and source switching on top.

pub mod client;
pub mod dto;
pub mod fallback;
pub mod primary;
pub mod settings;

pub use {
    client::{DataSource, IndexerClient},
    dto::{AddressTx, ChainBlock, ChainTransaction, Direction, TxInput, TxKind, TxOutput},
    fallback::FallbackSource,
    primary::PrimarySource,
    settings::{SourceKind, SourceSettings},
};

#[cfg(any(test, feature = "mocks"))]
pub use client::MockDataSource;

/// Errors surfaced by a single upstream request. The client recovers from
/// all of these; callers above the client only ever see them after retries
/// and a source switch have been exhausted.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP 429. Triggers backoff and delay doubling on the conservative
    /// source.
    #[error("rate limited")]
    RateLimited,
    #[error("http status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The response parsed as JSON but did not carry an expected field.
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Converts a response status into the error taxonomy before body decoding.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.as_u16() == 429 {
        return Err(FetchError::RateLimited);
    }
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    Ok(response)
}
