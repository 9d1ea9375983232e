use {
    crate::{
        FetchError,
        dto::{AddressTx, ChainBlock, ChainTransaction},
        settings::{SourceKind, SourceSettings},
    },
    futures::future::BoxFuture,
    std::{
        sync::{
            Arc,
            atomic::{AtomicU32, AtomicUsize, Ordering},
        },
        time::Duration,
    },
};

/// Capability set both upstream implementations provide. Source specific
/// throughput knobs live beside the capability so callers never hardcode
/// them.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn settings(&self) -> &SourceSettings;
    async fn chain_height(&self) -> Result<i64, FetchError>;
    async fn get_block(&self, height: i64) -> Result<ChainBlock, FetchError>;
    async fn get_transaction(&self, txid: &str) -> Result<ChainTransaction, FetchError>;
    async fn get_address_transactions(&self, address: &str) -> Result<Vec<AddressTx>, FetchError>;
}

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
/// Cap on the delay-doubling exponent so a long outage cannot push the
/// throttle into hours.
const MAX_ERROR_EXPONENT: u32 = 6;

/// Fronts the two upstream sources. Every call retries with backoff against
/// the active source and fails over to the other one at most once, so a
/// flapping upstream cannot ping-pong the client mid-request.
pub struct IndexerClient {
    sources: [Arc<dyn DataSource>; 2],
    active: AtomicUsize,
    consecutive_errors: AtomicU32,
}

impl IndexerClient {
    pub fn new(
        primary: Arc<dyn DataSource>,
        fallback: Arc<dyn DataSource>,
        initial: SourceKind,
    ) -> Self {
        Self {
            sources: [primary, fallback],
            active: AtomicUsize::new(match initial {
                SourceKind::Primary => 0,
                SourceKind::Fallback => 1,
            }),
            consecutive_errors: AtomicU32::new(0),
        }
    }

    pub fn active_kind(&self) -> SourceKind {
        match self.active.load(Ordering::Acquire) {
            0 => SourceKind::Primary,
            _ => SourceKind::Fallback,
        }
    }

    /// Snapshot of the active source's settings. Taken once per pipeline
    /// tick so a mid-tick source switch cannot tear the tuning values.
    pub fn active_settings(&self) -> SourceSettings {
        self.sources[self.active.load(Ordering::Acquire)]
            .settings()
            .clone()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Acquire)
    }

    /// The per-request delay currently in effect: the active source's
    /// minimum delay doubled once per consecutive error.
    pub fn effective_min_delay(&self) -> Duration {
        let settings = self.active_settings();
        if !settings.rate_limited {
            return Duration::ZERO;
        }
        let exponent = self.consecutive_errors().min(MAX_ERROR_EXPONENT);
        settings.min_request_delay.saturating_mul(1 << exponent)
    }

    fn record_success(&self) {
        let _ = self
            .consecutive_errors
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |errors| {
                Some(errors.saturating_sub(1))
            });
    }

    fn record_failure(&self) {
        let _ = self
            .consecutive_errors
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |errors| {
                Some((errors + 1).min(MAX_ERROR_EXPONENT))
            });
    }

    async fn with_retry<'a, T, F>(&'a self, operation: &'static str, f: F) -> Result<T, FetchError>
    where
        F: Fn(&'a dyn DataSource) -> BoxFuture<'a, Result<T, FetchError>>,
    {
        let index = self.active.load(Ordering::Acquire);
        match self.attempts(index, operation, &f).await {
            Ok(value) => Ok(value),
            Err(err) => {
                let other = 1 - index;
                tracing::warn!(
                    operation,
                    ?err,
                    from = self.sources[index].name(),
                    to = self.sources[other].name(),
                    "exhausted retries, switching indexer source"
                );
                self.active.store(other, Ordering::Release);
                Metrics::get().source_switches.inc();
                self.attempts(other, operation, &f).await
            }
        }
    }

    async fn attempts<'a, T, F>(
        &'a self,
        index: usize,
        operation: &'static str,
        f: &F,
    ) -> Result<T, FetchError>
    where
        F: Fn(&'a dyn DataSource) -> BoxFuture<'a, Result<T, FetchError>>,
    {
        let source = self.sources[index].as_ref();
        let rate_limited = source.settings().rate_limited;
        let mut backoff = INITIAL_BACKOFF;
        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let throttle = self.effective_min_delay();
            if !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }
            match f(source).await {
                Ok(value) => {
                    self.record_success();
                    Metrics::get()
                        .requests
                        .with_label_values(&[operation, "ok"])
                        .inc();
                    return Ok(value);
                }
                Err(err) => {
                    self.record_failure();
                    Metrics::get()
                        .requests
                        .with_label_values(&[operation, "error"])
                        .inc();
                    tracing::warn!(
                        operation,
                        source = source.name(),
                        attempt,
                        ?err,
                        "indexer request failed"
                    );
                    last_error = Some(err);
                    if attempt < MAX_ATTEMPTS && rate_limited {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }
        Err(last_error.expect("attempt loop always records an error"))
    }
}

#[async_trait::async_trait]
impl DataSource for IndexerClient {
    fn name(&self) -> &'static str {
        self.sources[self.active.load(Ordering::Acquire)].name()
    }

    fn settings(&self) -> &SourceSettings {
        self.sources[self.active.load(Ordering::Acquire)].settings()
    }

    async fn chain_height(&self) -> Result<i64, FetchError> {
        self.with_retry("chain_height", |source| source.chain_height())
            .await
    }

    async fn get_block(&self, height: i64) -> Result<ChainBlock, FetchError> {
        self.with_retry("get_block", move |source| source.get_block(height))
            .await
    }

    async fn get_transaction(&self, txid: &str) -> Result<ChainTransaction, FetchError> {
        self.with_retry("get_transaction", move |source| source.get_transaction(txid))
            .await
    }

    async fn get_address_transactions(&self, address: &str) -> Result<Vec<AddressTx>, FetchError> {
        self.with_retry("get_address_transactions", move |source| {
            source.get_address_transactions(address)
        })
        .await
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "indexer")]
struct Metrics {
    /// Upstream request outcomes.
    #[metric(labels("operation", "result"))]
    requests: prometheus::IntCounterVec,

    /// How often the client failed over to the other source.
    source_switches: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Self::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_settings() -> SourceSettings {
        SourceSettings {
            min_request_delay: Duration::from_millis(1),
            batch_delay: Duration::ZERO,
            rate_limited: false,
            ..SourceSettings::primary()
        }
    }

    fn throttled_settings() -> SourceSettings {
        SourceSettings {
            min_request_delay: Duration::from_millis(1),
            batch_delay: Duration::ZERO,
            rate_limited: true,
            ..SourceSettings::fallback()
        }
    }

    fn mock(name: &'static str, settings: SourceSettings) -> MockDataSource {
        let mut mock = MockDataSource::new();
        mock.expect_name().return_const(name);
        mock.expect_settings().return_const(settings);
        mock
    }

    fn client(primary: MockDataSource, fallback: MockDataSource) -> IndexerClient {
        IndexerClient::new(Arc::new(primary), Arc::new(fallback), SourceKind::Primary)
    }

    #[tokio::test]
    async fn success_passes_through() {
        let mut primary = mock("primary", instant_settings());
        primary
            .expect_chain_height()
            .times(1)
            .returning(|| Ok(12000));
        let fallback = mock("fallback", instant_settings());

        let client = client(primary, fallback);
        assert_eq!(client.chain_height().await.unwrap(), 12000);
        assert_eq!(client.consecutive_errors(), 0);
        assert_eq!(client.active_kind(), SourceKind::Primary);
    }

    #[tokio::test]
    async fn exhausted_retries_switch_source_once() {
        let mut primary = mock("primary", instant_settings());
        primary
            .expect_chain_height()
            .times(3)
            .returning(|| Err(FetchError::Status(500)));
        let mut fallback = mock("fallback", instant_settings());
        fallback
            .expect_chain_height()
            .times(1)
            .returning(|| Ok(11999));

        let client = client(primary, fallback);
        assert_eq!(client.chain_height().await.unwrap(), 11999);
        assert_eq!(client.active_kind(), SourceKind::Fallback);
    }

    #[tokio::test]
    async fn both_sources_failing_is_an_error() {
        let mut primary = mock("primary", instant_settings());
        primary
            .expect_chain_height()
            .times(3)
            .returning(|| Err(FetchError::Status(500)));
        let mut fallback = mock("fallback", instant_settings());
        fallback
            .expect_chain_height()
            .times(3)
            .returning(|| Err(FetchError::Status(502)));

        let client = client(primary, fallback);
        // The switch is one shot: after the fallback also fails the call
        // errors out instead of rotating back to the primary.
        assert!(matches!(
            client.chain_height().await,
            Err(FetchError::Status(502))
        ));
        assert_eq!(client.active_kind(), SourceKind::Fallback);
    }

    #[tokio::test]
    async fn rate_limits_double_delay_and_success_decrements() {
        let mut primary = mock("primary", throttled_settings());
        let mut calls = 0;
        primary.expect_chain_height().times(3).returning(move || {
            calls += 1;
            if calls <= 2 {
                Err(FetchError::RateLimited)
            } else {
                Ok(12000)
            }
        });
        let fallback = mock("fallback", throttled_settings());

        let client = client(primary, fallback);
        let base = Duration::from_millis(1);
        assert_eq!(client.effective_min_delay(), base);

        assert_eq!(client.chain_height().await.unwrap(), 12000);
        // Two 429s then one success: 0 -> 1 -> 2 -> 1.
        assert_eq!(client.consecutive_errors(), 1);
        assert_eq!(client.effective_min_delay(), base * 2);

        let mut primary = mock("primary", throttled_settings());
        primary
            .expect_chain_height()
            .times(1)
            .returning(|| Ok(12001));
        let client2 = client_with_errors(primary, 1);
        client2.chain_height().await.unwrap();
        assert_eq!(client2.consecutive_errors(), 0);
        assert_eq!(client2.effective_min_delay(), base);
    }

    fn client_with_errors(primary: MockDataSource, errors: u32) -> IndexerClient {
        let client = client(primary, mock("fallback", throttled_settings()));
        client.consecutive_errors.store(errors, Ordering::Release);
        client
    }

    #[tokio::test]
    async fn error_exponent_saturates() {
        let mut primary = mock("primary", throttled_settings());
        primary
            .expect_chain_height()
            .times(1)
            .returning(|| Ok(1));
        let client = client_with_errors(primary, MAX_ERROR_EXPONENT);
        let base = Duration::from_millis(1);
        assert_eq!(client.effective_min_delay(), base * 64);
        client.chain_height().await.unwrap();
        assert_eq!(client.consecutive_errors(), MAX_ERROR_EXPONENT - 1);
    }
}
