use {
    crate::events,
    classifier::Classifier,
    database::Store,
    futures::future::join_all,
    indexer::client::DataSource,
    model::{Block, FlowEvent, Transaction},
    std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::{Duration, Instant},
    },
};

/// Stored span may exceed the retention window by this factor before a sweep
/// is triggered.
const RETENTION_SLACK: f64 = 1.1;

/// Keeps the store within `window_blocks` of the chain tip: catches up
/// forward first, then backfills history, committing each tick as one
/// batched write per table.
pub struct SyncPipeline {
    indexer: Arc<dyn DataSource>,
    classifier: Arc<Classifier>,
    store: Store,
    window_blocks: i64,
    running: AtomicBool,
    perf: Mutex<PerfCounters>,
}

/// Rolling performance counters surfaced on the status endpoint.
#[derive(Clone, Debug, Default)]
pub struct PerfCounters {
    pub blocks_per_minute: f64,
    pub last_batch_size: usize,
    pub last_batch_duration: Duration,
    pub consecutive_errors: u32,
}

impl SyncPipeline {
    pub fn new(
        indexer: Arc<dyn DataSource>,
        classifier: Arc<Classifier>,
        store: Store,
        window_blocks: i64,
    ) -> Self {
        Self {
            indexer,
            classifier,
            store,
            window_blocks,
            running: AtomicBool::new(false),
            perf: Mutex::new(PerfCounters::default()),
        }
    }

    pub fn perf(&self) -> PerfCounters {
        self.perf.lock().unwrap().clone()
    }

    /// One scheduler tick. Overlapping ticks are rejected, not queued: the
    /// next tick re-derives all work from the store anyway.
    pub async fn run_tick(&self) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::info!("previous sync tick still running, skipping");
            Metrics::get().ticks.with_label_values(&["skipped"]).inc();
            return Ok(());
        }
        let result = self.tick_inner().await;
        self.running.store(false, Ordering::Release);
        match &result {
            Ok(()) => Metrics::get().ticks.with_label_values(&["ok"]).inc(),
            Err(err) => {
                tracing::warn!(?err, "sync tick failed");
                Metrics::get().ticks.with_label_values(&["error"]).inc();
            }
        }
        result
    }

    async fn tick_inner(&self) -> anyhow::Result<()> {
        let settings = self.indexer.settings().clone();
        let chain_height = self.indexer.chain_height().await?;
        let heights = self.plan_batch(chain_height, settings.batch_size).await?;
        if heights.is_empty() {
            tracing::debug!(chain_height, "store is caught up and backfilled");
            self.sweep_retention(chain_height).await?;
            return Ok(());
        }

        let started = Instant::now();
        let direction = if heights[0] > self.store.latest_synced_height().await?.unwrap_or(0) {
            "forward"
        } else {
            "backfill"
        };
        tracing::debug!(
            from = heights.first(),
            to = heights.last(),
            direction,
            "fetching block batch"
        );

        let (blocks, failures) = self.fetch_blocks(&heights, &settings).await;
        let fetched = blocks.len();
        self.commit(&blocks).await?;

        if direction == "forward" {
            // Failed blocks are skipped, not retried next tick; the error
            // counter and logs surface them.
            if let Some(last) = heights.last() {
                self.store.set_latest_synced_height(*last).await?;
            }
        }

        self.sweep_retention(chain_height).await?;
        self.update_perf(fetched, failures, started.elapsed());
        Ok(())
    }

    /// Decides which heights this tick works on: forward to the tip first,
    /// then backwards until the retention window is full.
    async fn plan_batch(&self, chain_height: i64, batch_size: usize) -> anyhow::Result<Vec<i64>> {
        let batch = i64::try_from(batch_size.max(1)).unwrap_or(i64::MAX);
        let latest_synced = self.store.latest_synced_height().await?;

        let latest = match latest_synced {
            Some(latest) => latest,
            // First run: start at the tip, history fills in via backfill.
            None => chain_height - 1,
        };
        if latest < chain_height {
            let to = chain_height.min(latest + batch);
            return Ok(((latest + 1)..=to).collect());
        }

        let stored = self.store.block_count().await?;
        let Some((oldest, _)) = self.store.stored_height_range().await? else {
            return Ok(Vec::new());
        };
        let retention_target = (chain_height - self.window_blocks).max(1);
        if stored < self.window_blocks && oldest > retention_target {
            let from = (oldest - batch).max(retention_target);
            return Ok((from..oldest).collect());
        }
        Ok(Vec::new())
    }

    /// Fetches a batch in chunks: chunks run serially with the inter-batch
    /// delay between them, blocks within a chunk concurrently.
    async fn fetch_blocks(
        &self,
        heights: &[i64],
        settings: &indexer::SourceSettings,
    ) -> (Vec<indexer::ChainBlock>, u32) {
        let mut blocks = Vec::with_capacity(heights.len());
        let mut failures = 0u32;
        let chunks: Vec<&[i64]> = heights.chunks(settings.max_concurrent.max(1)).collect();
        let last_chunk = chunks.len().saturating_sub(1);
        for (index, chunk) in chunks.into_iter().enumerate() {
            let results = join_all(chunk.iter().map(|height| self.indexer.get_block(*height))).await;
            for (height, result) in chunk.iter().zip(results) {
                match result {
                    Ok(block) => blocks.push(block),
                    Err(err) => {
                        failures += 1;
                        tracing::warn!(height, ?err, "skipping block after retries");
                    }
                }
            }
            if index < last_chunk && !settings.batch_delay.is_zero() {
                tokio::time::sleep(settings.batch_delay).await;
            }
        }
        (blocks, failures)
    }

    /// Builds rows for everything fetched and commits them: blocks first so
    /// no flow event ever references an unstored height, then transactions,
    /// then all flow events in a single transaction.
    async fn commit(&self, chain_blocks: &[indexer::ChainBlock]) -> anyhow::Result<()> {
        let mut blocks: Vec<Block> = Vec::with_capacity(chain_blocks.len());
        let mut transactions: Vec<Transaction> = Vec::new();
        let mut flow_events: Vec<FlowEvent> = Vec::new();
        for block in chain_blocks {
            blocks.push(events::to_stored_block(block));
            for tx in &block.txs {
                if events::is_ignored_kind(tx) {
                    continue;
                }
                if !events::is_relevant(tx, &self.classifier) {
                    continue;
                }
                transactions.push(events::to_stored_transaction(block, tx));
                flow_events.extend(events::build_flow_events(block, tx, &self.classifier));
            }
        }

        self.store.save_blocks_batch(&blocks).await?;
        self.store.save_transactions_batch(&transactions).await?;
        self.store.save_flow_events_batch(&flow_events).await?;
        if !flow_events.is_empty() {
            tracing::info!(
                blocks = blocks.len(),
                transactions = transactions.len(),
                flow_events = flow_events.len(),
                "committed batch"
            );
        }
        Ok(())
    }

    /// Runs the store's sweep once the stored span exceeds the window by
    /// more than the slack. Runs between batches, never during a commit.
    async fn sweep_retention(&self, chain_height: i64) -> anyhow::Result<()> {
        let Some((oldest, newest)) = self.store.stored_height_range().await? else {
            return Ok(());
        };
        let span = newest - oldest + 1;
        let threshold = (self.window_blocks as f64 * RETENTION_SLACK) as i64;
        if span <= threshold {
            return Ok(());
        }
        let (blocks, transactions, flow_events) = self
            .store
            .cleanup_old_data(chain_height, self.window_blocks)
            .await?;
        tracing::info!(blocks, transactions, flow_events, "retention sweep");
        Metrics::get().retention_sweeps.inc();
        Ok(())
    }

    fn update_perf(&self, fetched: usize, failures: u32, elapsed: Duration) {
        let mut perf = self.perf.lock().unwrap();
        perf.last_batch_size = fetched;
        perf.last_batch_duration = elapsed;
        perf.blocks_per_minute = if elapsed.is_zero() {
            0.0
        } else {
            fetched as f64 / elapsed.as_secs_f64() * 60.0
        };
        perf.consecutive_errors = if failures == 0 {
            perf.consecutive_errors.saturating_sub(1)
        } else {
            perf.consecutive_errors.saturating_add(failures)
        };

        let metrics = Metrics::get();
        metrics.blocks_per_minute.set(perf.blocks_per_minute);
        metrics
            .last_batch_size
            .set(i64::try_from(fetched).unwrap_or(i64::MAX));
        metrics
            .consecutive_errors
            .set(i64::from(perf.consecutive_errors));
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "sync_pipeline")]
struct Metrics {
    /// Tick outcomes.
    #[metric(labels("result"))]
    ticks: prometheus::IntCounterVec,

    /// Ingestion throughput over the last batch.
    blocks_per_minute: prometheus::Gauge,

    /// Blocks fetched by the last tick.
    last_batch_size: prometheus::IntGauge,

    /// Block fetch failures in a row, decremented by clean ticks.
    consecutive_errors: prometheus::IntGauge,

    /// Completed retention sweeps.
    retention_sweeps: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Self::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        classifier::AddressBook,
        indexer::{MockDataSource, SourceSettings, TxInput, TxKind, TxOutput},
        model::{AddressType, FlowType},
    };

    fn classifier() -> Arc<Classifier> {
        let book = AddressBook::from_toml(
            r#"
                [exchanges.t1binance]
                name = "Binance"
                logo = "binance.png"
            "#,
        )
        .unwrap();
        Arc::new(Classifier::new(
            book,
            "http://localhost:1/".parse().unwrap(),
            reqwest::Client::new(),
        ))
    }

    fn instant_settings() -> SourceSettings {
        SourceSettings {
            batch_size: 5,
            max_concurrent: 2,
            batch_delay: Duration::ZERO,
            min_request_delay: Duration::ZERO,
            ..SourceSettings::primary()
        }
    }

    fn chain_block(height: i64) -> indexer::ChainBlock {
        indexer::ChainBlock {
            height,
            hash: format!("hash{height}"),
            time: height * 30,
            size: 500,
            tx_count: 2,
            txs: vec![
                // Relevant transfer from the exchange.
                indexer::ChainTransaction {
                    txid: format!("buy{height}"),
                    kind: Some(TxKind::Transfer),
                    vin: vec![TxInput {
                        addresses: vec!["t1binance".to_string()],
                        value_sats: 10_0000_0000,
                    }],
                    vout: vec![TxOutput {
                        n: 0,
                        addresses: vec!["t1someone".to_string()],
                        value_sats: 10_0000_0000,
                    }],
                },
                // Unclassified noise, filtered out.
                indexer::ChainTransaction {
                    txid: format!("noise{height}"),
                    kind: Some(TxKind::Transfer),
                    vin: vec![TxInput {
                        addresses: vec!["t1nobody".to_string()],
                        value_sats: 1_0000_0000,
                    }],
                    vout: vec![TxOutput {
                        n: 0,
                        addresses: vec!["t1other".to_string()],
                        value_sats: 1_0000_0000,
                    }],
                },
            ],
        }
    }

    fn mock_source(chain_height: i64) -> MockDataSource {
        let mut mock = MockDataSource::new();
        mock.expect_name().return_const("primary");
        mock.expect_settings().return_const(instant_settings());
        mock.expect_chain_height()
            .returning(move || Ok(chain_height));
        mock.expect_get_block()
            .returning(|height| Ok(chain_block(height)));
        mock
    }

    #[tokio::test]
    async fn first_tick_starts_at_the_tip() {
        let store = Store::new_in_memory().await.unwrap();
        let pipeline = SyncPipeline::new(
            Arc::new(mock_source(12000)),
            classifier(),
            store.clone(),
            2880,
        );

        pipeline.run_tick().await.unwrap();

        assert_eq!(store.latest_synced_height().await.unwrap(), Some(12000));
        assert_eq!(store.stored_height_range().await.unwrap(), Some((12000, 12000)));
        let events = store.get_flow_events(0, 20000).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].flow_type, FlowType::Buying);
        assert_eq!(events[0].from_type, AddressType::Exchange);
        assert_eq!(events[0].to_type, AddressType::Unknown);
        // The irrelevant transaction was dropped entirely.
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.transaction_count, 1);
    }

    #[tokio::test]
    async fn forward_catchup_then_backfill() {
        let store = Store::new_in_memory().await.unwrap();
        store.set_latest_synced_height(11998).await.unwrap();
        let pipeline = SyncPipeline::new(
            Arc::new(mock_source(12000)),
            classifier(),
            store.clone(),
            2880,
        );

        // Forward: catches 11999 and 12000.
        pipeline.run_tick().await.unwrap();
        assert_eq!(store.latest_synced_height().await.unwrap(), Some(12000));
        assert_eq!(store.stored_height_range().await.unwrap(), Some((11999, 12000)));

        // Caught up: the next tick backfills below the oldest stored block.
        pipeline.run_tick().await.unwrap();
        assert_eq!(store.stored_height_range().await.unwrap(), Some((11994, 12000)));
        // The checkpoint is untouched by backfill.
        assert_eq!(store.latest_synced_height().await.unwrap(), Some(12000));
    }

    #[tokio::test]
    async fn failed_blocks_are_skipped_and_counted() {
        let store = Store::new_in_memory().await.unwrap();
        store.set_latest_synced_height(11997).await.unwrap();
        let mut mock = MockDataSource::new();
        mock.expect_name().return_const("primary");
        mock.expect_settings().return_const(instant_settings());
        mock.expect_chain_height().returning(|| Ok(12000));
        mock.expect_get_block().returning(|height| {
            if height == 11999 {
                Err(indexer::FetchError::Status(500))
            } else {
                Ok(chain_block(height))
            }
        });
        let pipeline = SyncPipeline::new(Arc::new(mock), classifier(), store.clone(), 2880);

        pipeline.run_tick().await.unwrap();

        // The good blocks committed, the failed one is skipped for good.
        assert_eq!(store.block_count().await.unwrap(), 2);
        assert_eq!(store.latest_synced_height().await.unwrap(), Some(12000));
        assert_eq!(pipeline.perf().consecutive_errors, 1);
        assert_eq!(pipeline.perf().last_batch_size, 2);

        // A clean tick decrements the error counter.
        pipeline.run_tick().await.unwrap();
        assert_eq!(pipeline.perf().consecutive_errors, 0);
    }

    #[tokio::test]
    async fn retention_sweep_triggers_past_the_slack() {
        let store = Store::new_in_memory().await.unwrap();
        // Window of 3 blocks with slack 1.1 allows a span of 3; store 5.
        for height in 11996..=12000 {
            store
                .save_block(&model::Block {
                    height,
                    hash: format!("hash{height}"),
                    time: height * 30,
                    tx_count: 0,
                    size: 100,
                })
                .await
                .unwrap();
        }
        store.set_latest_synced_height(12000).await.unwrap();
        let pipeline = SyncPipeline::new(Arc::new(mock_source(12000)), classifier(), store.clone(), 3);

        pipeline.run_tick().await.unwrap();

        let (oldest, newest) = store.stored_height_range().await.unwrap().unwrap();
        assert_eq!(newest, 12000);
        assert!(oldest >= 12000 - 3);
    }
}
