use {
    crate::{blocks, flow_events, schema, stats, sync_state, transactions},
    model::{Block, ClassificationPatch, FlowEvent, Transaction},
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    },
    std::{path::Path, time::Duration},
};

/// Events per side returned by the unknown-wallet query.
const UNKNOWN_WALLETS_CAP: i64 = 1000;

/// Owner of the database file. All durable state flows through this type;
/// other components never touch the pool directly.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Unclassified flow events pending enhancement, split by which side is
/// unknown.
#[derive(Clone, Debug, Default)]
pub struct UnknownWallets {
    pub buys: Vec<FlowEvent>,
    pub sells: Vec<FlowEvent>,
}

impl UnknownWallets {
    pub fn total(&self) -> usize {
        self.buys.len() + self.sells.len()
    }
}

impl Store {
    /// Opens (creating if missing) the database file and applies the schema.
    pub async fn open(path: &Path) -> sqlx::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::initialize(pool).await
    }

    /// An isolated in-memory database for tests. A single connection so
    /// every query sees the same database.
    pub async fn new_in_memory() -> sqlx::Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // The pool must never drop its only connection or the database
        // vanishes with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::initialize(pool).await
    }

    async fn initialize(pool: SqlitePool) -> sqlx::Result<Self> {
        let mut ex = pool.acquire().await?;
        schema::initialize(&mut ex).await?;
        drop(ex);
        Ok(Self { pool })
    }

    pub async fn save_block(&self, block: &Block) -> sqlx::Result<()> {
        let _timer = Metrics::start("save_block");
        let mut ex = self.pool.acquire().await?;
        blocks::upsert(&mut ex, block).await
    }

    pub async fn save_blocks_batch(&self, batch: &[Block]) -> sqlx::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let _timer = Metrics::start("save_blocks_batch");
        let mut tx = self.pool.begin().await?;
        for block in batch {
            blocks::upsert(&mut tx, block).await?;
        }
        tx.commit().await
    }

    pub async fn save_transaction(&self, transaction: &Transaction) -> sqlx::Result<()> {
        let _timer = Metrics::start("save_transaction");
        let mut ex = self.pool.acquire().await?;
        transactions::upsert(&mut ex, transaction).await
    }

    pub async fn save_transactions_batch(&self, batch: &[Transaction]) -> sqlx::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let _timer = Metrics::start("save_transactions_batch");
        let mut tx = self.pool.begin().await?;
        for transaction in batch {
            transactions::upsert(&mut tx, transaction).await?;
        }
        tx.commit().await
    }

    /// Commits the whole batch in one transaction. The ingestion pipeline
    /// writes hundreds of events per tick; committing them row by row would
    /// interleave with enhancement writes and stall both sides.
    pub async fn save_flow_events_batch(&self, events: &[FlowEvent]) -> sqlx::Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let _timer = Metrics::start("save_flow_events_batch");
        let mut tx = self.pool.begin().await?;
        for event in events {
            flow_events::upsert(&mut tx, event).await?;
        }
        tx.commit().await
    }

    /// Events with `low <= block_height <= high`, newest first.
    pub async fn get_flow_events(&self, low: i64, high: i64) -> sqlx::Result<Vec<FlowEvent>> {
        let _timer = Metrics::start("get_flow_events");
        let mut ex = self.pool.acquire().await?;
        flow_events::fetch_range(&mut ex, low, high).await
    }

    pub async fn get_flow_event(&self, id: i64) -> sqlx::Result<Option<FlowEvent>> {
        let _timer = Metrics::start("get_flow_event");
        let mut ex = self.pool.acquire().await?;
        flow_events::fetch(&mut ex, id).await
    }

    /// Level 0 events with an unknown side, excluding events whose last
    /// enhancement attempt is still inside the cooldown. Capped per side,
    /// newest first.
    pub async fn get_unknown_wallets(&self, retry_after: Duration) -> sqlx::Result<UnknownWallets> {
        let _timer = Metrics::start("get_unknown_wallets");
        let cutoff = now_unix() - saturating_secs(retry_after);
        let mut ex = self.pool.acquire().await?;
        let buys = flow_events::unknown_buys(&mut ex, cutoff, UNKNOWN_WALLETS_CAP).await?;
        let sells = flow_events::unknown_sells(&mut ex, cutoff, UNKNOWN_WALLETS_CAP).await?;
        Ok(UnknownWallets { buys, sells })
    }

    pub async fn update_flow_event_classification(
        &self,
        id: i64,
        patch: &ClassificationPatch,
    ) -> sqlx::Result<()> {
        let _timer = Metrics::start("update_flow_event_classification");
        let mut ex = self.pool.acquire().await?;
        flow_events::update_classification(&mut ex, id, patch).await
    }

    /// Deletes everything below `current_block - window_blocks` in one
    /// transaction, then compacts the file. Returns deleted row counts as
    /// (blocks, transactions, flow events).
    pub async fn cleanup_old_data(
        &self,
        current_block: i64,
        window_blocks: i64,
    ) -> sqlx::Result<(u64, u64, u64)> {
        let _timer = Metrics::start("cleanup_old_data");
        let cutoff = current_block - window_blocks;
        let mut tx = self.pool.begin().await?;
        let events = flow_events::delete_below(&mut tx, cutoff).await?;
        let txs = transactions::delete_below(&mut tx, cutoff).await?;
        let blocks = blocks::delete_below(&mut tx, cutoff).await?;
        tx.commit().await?;
        // VACUUM cannot run inside a transaction.
        sqlx::query("VACUUM;").execute(&self.pool).await?;
        Ok((blocks, txs, events))
    }

    pub async fn get_stats(&self) -> sqlx::Result<stats::Stats> {
        let _timer = Metrics::start("get_stats");
        let mut ex = self.pool.acquire().await?;
        stats::fetch(&mut ex).await
    }

    pub async fn block_count(&self) -> sqlx::Result<i64> {
        let mut ex = self.pool.acquire().await?;
        blocks::count(&mut ex).await
    }

    pub async fn stored_height_range(&self) -> sqlx::Result<Option<(i64, i64)>> {
        let mut ex = self.pool.acquire().await?;
        blocks::height_range(&mut ex).await
    }

    pub async fn latest_synced_height(&self) -> sqlx::Result<Option<i64>> {
        let mut ex = self.pool.acquire().await?;
        let value = sync_state::get(&mut ex, sync_state::LATEST_SYNCED_HEIGHT).await?;
        Ok(value.and_then(|value| value.parse().ok()))
    }

    pub async fn set_latest_synced_height(&self, height: i64) -> sqlx::Result<()> {
        let mut ex = self.pool.acquire().await?;
        sync_state::set(&mut ex, sync_state::LATEST_SYNCED_HEIGHT, &height.to_string()).await
    }

    pub async fn sync_state_get(&self, key: &str) -> sqlx::Result<Option<String>> {
        let mut ex = self.pool.acquire().await?;
        sync_state::get(&mut ex, key).await
    }

    pub async fn sync_state_set(&self, key: &str, value: &str) -> sqlx::Result<()> {
        let mut ex = self.pool.acquire().await?;
        sync_state::set(&mut ex, key, value).await
    }
}

/// Periodically exports per-table row counts, mirroring what `get_stats`
/// reports on demand.
pub async fn database_metrics(db: Store) -> ! {
    loop {
        if let Err(err) = db.update_table_rows_metric().await {
            tracing::error!(?err, "failed to update table rows metric");
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}

impl Store {
    async fn update_table_rows_metric(&self) -> sqlx::Result<()> {
        let metrics = Metrics::get();
        for &table in crate::ALL_TABLES {
            let mut ex = self.pool.acquire().await?;
            let count = count_rows_in_table(&mut ex, table).await?;
            metrics.table_rows.with_label_values(&[table]).set(count);
        }
        Ok(())
    }
}

async fn count_rows_in_table(
    ex: &mut sqlx::SqliteConnection,
    table: &str,
) -> sqlx::Result<i64> {
    let query = format!("SELECT COUNT(*) FROM {table};");
    sqlx::query_scalar(&query).fetch_one(ex).await
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

fn saturating_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "database")]
struct Metrics {
    /// Timing of store operations.
    #[metric(labels("operation"))]
    queries: prometheus::HistogramVec,

    /// Number of rows in db tables.
    #[metric(labels("table"))]
    table_rows: prometheus::IntGaugeVec,
}

impl Metrics {
    fn get() -> &'static Self {
        Self::instance(observe::metrics::get_storage_registry()).unwrap()
    }

    fn start(operation: &str) -> prometheus::HistogramTimer {
        Self::get().queries.with_label_values(&[operation]).start_timer()
    }
}
