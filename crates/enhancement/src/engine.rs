use {
    crate::cache::{CoinbaseInfo, ConnectionInfo, EnhancementCache},
    classifier::{Classifier, NodeOperator},
    database::Store,
    futures::future::join_all,
    indexer::{AddressTx, Direction, FetchError, client::DataSource},
    model::{
        AddressType, ClassificationPatch, DataSource as EventSource, Details, DetectionMethod,
        FlowEvent, OperatorStatus,
    },
    std::{
        collections::{HashSet, VecDeque},
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    },
};

/// Counterparties inspected per historical connection scan.
const CONNECTION_SCAN_CAP: usize = 20;
/// The classifier snapshot is refreshed when older than this before a run.
const CLASSIFIER_MAX_AGE: Duration = Duration::from_secs(10 * 60);
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Clone, Debug)]
pub struct EnhancementConfig {
    /// Maximum intermediary wallets the multi-hop search traverses.
    pub max_hops: u32,
    /// Block window around the event for multi-hop candidate transactions.
    pub time_window_blocks: i64,
    /// Cooldown before an event that yielded nothing is analyzed again.
    pub failed_retry: Duration,
    pub historical_detection: bool,
    /// Block window for coinbase receipt scans.
    pub historical_window_blocks: i64,
    pub historical_connections: bool,
    pub max_branches_per_wallet: usize,
    /// Detections scoring below this confidence are discarded.
    pub min_confidence: f64,
    pub parallel: bool,
    pub batch_size: usize,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            max_hops: 2,
            time_window_blocks: 2880,
            failed_retry: Duration::from_secs(6 * 60 * 60),
            historical_detection: true,
            // One year of 30 second blocks.
            historical_window_blocks: 1_051_200,
            historical_connections: true,
            max_branches_per_wallet: 3,
            min_confidence: 0.5,
            parallel: true,
            batch_size: 5,
        }
    }
}

/// Outcome of one `enhance_unknowns` run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    pub analyzed: usize,
    pub enhanced: usize,
    pub remaining_unknown: usize,
    pub circular_detections: u64,
    pub errors: usize,
}

/// Rewrites flow events whose unknown side turns out to be a node operator
/// reachable through up to `max_hops` intermediary wallets.
pub struct Engine {
    source: Arc<dyn DataSource>,
    classifier: Arc<Classifier>,
    store: Store,
    cache: EnhancementCache,
    config: EnhancementConfig,
    circular_detections: AtomicU64,
}

/// Which side of the event is unknown, and therefore which direction the
/// transaction graph is traversed in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Side {
    /// Exchange buy with an unknown buyer: follow where the funds went.
    Buy,
    /// Exchange sell from an unknown seller: follow where they came from.
    Sell,
}

impl Side {
    fn wallet<'a>(&self, event: &'a FlowEvent) -> &'a str {
        match self {
            Self::Buy => &event.to_address,
            Self::Sell => &event.from_address,
        }
    }

    fn trace_direction(&self) -> Direction {
        match self {
            Self::Buy => Direction::Sent,
            Self::Sell => Direction::Received,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Buy => "outbound",
            Self::Sell => "inbound",
        }
    }
}

/// A successful detection, before being turned into a row patch.
#[derive(Clone, Debug)]
struct Hit {
    level: i64,
    method: DetectionMethod,
    status: OperatorStatus,
    node_wallet: String,
    /// Intermediary wallets, observed wallet first, final operator excluded.
    /// Empty for level 0 detections.
    chain: Vec<String>,
    txids: Vec<String>,
    coinbase: Option<CoinbaseInfo>,
    connection: Option<ConnectionInfo>,
    /// Registry entry when the final wallet is a current operator.
    operator: Option<NodeOperator>,
}

struct QueueEntry {
    wallet: String,
    depth: u32,
    chain: Vec<String>,
    txids: Vec<String>,
}

impl Engine {
    pub fn new(
        source: Arc<dyn DataSource>,
        classifier: Arc<Classifier>,
        store: Store,
        cache: EnhancementCache,
        config: EnhancementConfig,
    ) -> Self {
        Self {
            source,
            classifier,
            store,
            cache,
            config,
            circular_detections: AtomicU64::new(0),
        }
    }

    /// One enhancement run over everything the unknowns query returns.
    /// Events are processed in fixed-size batches; batches run serially so
    /// logging and cache warm-up stay coherent, events within a batch run
    /// concurrently when parallel processing is enabled.
    pub async fn enhance_unknowns(&self) -> anyhow::Result<RunSummary> {
        if self.classifier.is_stale(CLASSIFIER_MAX_AGE) {
            self.classifier.refresh_node_operators().await;
        }

        let unknowns = self.store.get_unknown_wallets(self.config.failed_retry).await?;
        let circular_before = self.circular_detections.load(Ordering::Relaxed);
        // An event unknown on both sides shows up in both lists; keep it
        // once so no two tasks of this run ever write the same row.
        let mut seen = HashSet::new();
        let work: Vec<(FlowEvent, Side)> = unknowns
            .buys
            .into_iter()
            .map(|event| (event, Side::Buy))
            .chain(unknowns.sells.into_iter().map(|event| (event, Side::Sell)))
            .filter(|(event, _)| seen.insert(event.id))
            .collect();

        let mut summary = RunSummary {
            analyzed: work.len(),
            ..Default::default()
        };
        for batch in work.chunks(self.config.batch_size.max(1)) {
            let outcomes = if self.config.parallel {
                join_all(batch.iter().map(|(event, side)| self.analyze(event, *side))).await
            } else {
                let mut outcomes = Vec::with_capacity(batch.len());
                for (event, side) in batch {
                    outcomes.push(self.analyze(event, *side).await);
                }
                outcomes
            };
            for outcome in outcomes {
                match outcome {
                    Ok(true) => summary.enhanced += 1,
                    Ok(false) => summary.remaining_unknown += 1,
                    Err(err) => {
                        summary.errors += 1;
                        tracing::warn!(?err, "event analysis failed, will retry next run");
                    }
                }
            }
        }

        summary.circular_detections =
            self.circular_detections.load(Ordering::Relaxed) - circular_before;
        self.cache.clear_expired();
        self.cache.log_stats();

        let metrics = Metrics::get();
        metrics.runs.inc();
        metrics.events_enhanced.inc_by(summary.enhanced as u64);
        metrics.events_unknown.inc_by(summary.remaining_unknown as u64);
        tracing::info!(
            analyzed = summary.analyzed,
            enhanced = summary.enhanced,
            remaining = summary.remaining_unknown,
            circular = summary.circular_detections,
            errors = summary.errors,
            "enhancement run finished"
        );
        Ok(summary)
    }

    /// Analyzes one event. Returns whether the row was enhanced. The final
    /// write is a single store call, so a crash mid-run leaves no partial
    /// event state.
    async fn analyze(&self, event: &FlowEvent, side: Side) -> anyhow::Result<bool> {
        let wallet = side.wallet(event).to_string();
        if wallet.is_empty() {
            self.stamp_miss(event).await?;
            return Ok(false);
        }

        let hit = match self.detect(&wallet, event, side).await {
            Ok(hit) => hit,
            Err(err) => {
                // Upstream trouble: leave the event unstamped so the next
                // run retries it immediately.
                return Err(err.into());
            }
        };

        match hit {
            Some(hit) if self.confidence(&hit) >= self.config.min_confidence => {
                let patch = self.build_patch(&wallet, &hit, side);
                self.store
                    .update_flow_event_classification(event.id, &patch)
                    .await?;
                tracing::debug!(
                    event = event.id,
                    wallet = %wallet,
                    level = hit.level,
                    method = ?hit.method,
                    direction = side.label(),
                    "event enhanced"
                );
                Ok(true)
            }
            Some(hit) => {
                tracing::debug!(
                    event = event.id,
                    confidence = self.confidence(&hit),
                    "detection below confidence threshold"
                );
                self.stamp_miss(event).await?;
                Ok(false)
            }
            None => {
                self.stamp_miss(event).await?;
                Ok(false)
            }
        }
    }

    async fn detect(
        &self,
        wallet: &str,
        event: &FlowEvent,
        side: Side,
    ) -> Result<Option<Hit>, FetchError> {
        if self.config.historical_detection {
            if let Some(hit) = self.direct_historical(wallet, event, side).await? {
                return Ok(Some(hit));
            }
        }
        self.multi_hop(wallet, event, side).await
    }

    fn confidence(&self, hit: &Hit) -> f64 {
        match hit.method {
            DetectionMethod::CurrentApi => 1.0,
            DetectionMethod::HistoricalCoinbase => 0.8,
            DetectionMethod::HistoricalConnection => 0.65,
        }
    }

    async fn stamp_miss(&self, event: &FlowEvent) -> anyhow::Result<()> {
        self.store
            .update_flow_event_classification(
                event.id,
                &ClassificationPatch::analyzed_at(now_unix()),
            )
            .await?;
        Ok(())
    }

    // Lane A: the observed wallet itself is (or was) a node operator.

    async fn direct_historical(
        &self,
        wallet: &str,
        event: &FlowEvent,
        side: Side,
    ) -> Result<Option<Hit>, FetchError> {
        let window_start = (event.block_height - self.config.historical_window_blocks).max(0);
        if let Some(info) = self
            .coinbase_check(wallet, window_start, event.block_height)
            .await?
        {
            return Ok(Some(Hit {
                level: 0,
                method: DetectionMethod::HistoricalCoinbase,
                status: OperatorStatus::Historical,
                node_wallet: wallet.to_string(),
                chain: Vec::new(),
                txids: Vec::new(),
                coinbase: Some(info),
                connection: None,
                operator: None,
            }));
        }

        if !self.config.historical_connections {
            return Ok(None);
        }
        let Some(connection) = self
            .historical_connection(wallet, event, side, window_start)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(Hit {
            level: 0,
            method: DetectionMethod::HistoricalConnection,
            status: OperatorStatus::Historical,
            node_wallet: connection.node_wallet.clone(),
            chain: Vec::new(),
            txids: vec![connection.connection_txid.clone()],
            coinbase: None,
            connection: Some(connection),
            operator: None,
        }))
    }

    /// Does the wallet have any coinbase receipt inside the block window?
    async fn coinbase_check(
        &self,
        wallet: &str,
        from_block: i64,
        to_block: i64,
    ) -> Result<Option<CoinbaseInfo>, FetchError> {
        let key = (wallet.to_string(), from_block, to_block);
        if let Some(cached) = self.cache.coinbase.get(&key) {
            return Ok(cached);
        }
        let txs = self.wallet_transactions(wallet).await?;
        let mut count = 0u32;
        let mut last: Option<&AddressTx> = None;
        for tx in txs
            .iter()
            .filter(|tx| tx.is_coinbase && tx.block_height >= from_block && tx.block_height <= to_block)
        {
            count += 1;
            if last.is_none_or(|l| tx.block_height > l.block_height) {
                last = Some(tx);
            }
        }
        let info = last.map(|tx| CoinbaseInfo {
            count,
            last_block: tx.block_height,
            last_timestamp: tx.timestamp,
        });
        self.cache.coinbase.insert(key, info);
        Ok(info)
    }

    /// Scans the wallet's most recent counterparties inside the window for
    /// one that is a current operator or has historical coinbase receipts.
    async fn historical_connection(
        &self,
        wallet: &str,
        event: &FlowEvent,
        side: Side,
        window_start: i64,
    ) -> Result<Option<ConnectionInfo>, FetchError> {
        let key = (wallet.to_string(), side.label(), window_start);
        if let Some(cached) = self.cache.connection.get(&key) {
            return Ok(cached);
        }

        let txs = self.wallet_transactions(wallet).await?;
        let recent: Vec<&AddressTx> = txs
            .iter()
            .rev()
            .filter(|tx| {
                tx.direction == side.trace_direction()
                    && tx.block_height >= window_start
                    && tx.block_height <= event.block_height
            })
            .take(CONNECTION_SCAN_CAP)
            .collect();

        let mut seen = HashSet::new();
        let mut result = None;
        for tx in recent {
            let Some(counterparty) = self.counterparty(wallet, &tx.txid, side).await? else {
                continue;
            };
            if !seen.insert(counterparty.clone()) {
                continue;
            }
            if self.operator_status(&counterparty).is_some() {
                result = Some(ConnectionInfo {
                    node_wallet: counterparty,
                    connection_txid: tx.txid.clone(),
                    connection_timestamp: tx.timestamp,
                    coinbase_count: None,
                });
                break;
            }
            if let Some(info) = self
                .coinbase_check(&counterparty, window_start, event.block_height)
                .await?
            {
                result = Some(ConnectionInfo {
                    node_wallet: counterparty,
                    connection_txid: tx.txid.clone(),
                    connection_timestamp: tx.timestamp,
                    coinbase_count: Some(info.count),
                });
                break;
            }
        }

        self.cache.connection.insert(key, result.clone());
        Ok(result)
    }

    // Lane B: breadth-first search through intermediary wallets.

    async fn multi_hop(
        &self,
        wallet: &str,
        event: &FlowEvent,
        side: Side,
    ) -> Result<Option<Hit>, FetchError> {
        let mut visited: HashSet<String> = HashSet::from([wallet.to_string()]);
        let mut queue = VecDeque::from([QueueEntry {
            wallet: wallet.to_string(),
            depth: 0,
            chain: vec![wallet.to_string()],
            txids: Vec::new(),
        }]);

        while let Some(entry) = queue.pop_front() {
            let hops = self.next_hops(&entry.wallet, event, side).await?;
            for (counterparty, txid) in hops {
                let level = i64::from(entry.depth) + 1;
                let mut txids = entry.txids.clone();
                txids.push(txid);

                if let Some(operator) = self.operator_status(&counterparty) {
                    return Ok(Some(Hit {
                        level,
                        method: DetectionMethod::CurrentApi,
                        status: OperatorStatus::Active,
                        node_wallet: counterparty,
                        chain: entry.chain.clone(),
                        txids,
                        coinbase: None,
                        connection: None,
                        operator: Some(operator),
                    }));
                }

                if self.config.historical_detection {
                    let window_start =
                        (event.block_height - self.config.historical_window_blocks).max(0);
                    if let Some(info) = self
                        .coinbase_check(&counterparty, window_start, event.block_height)
                        .await?
                    {
                        return Ok(Some(Hit {
                            level,
                            method: DetectionMethod::HistoricalCoinbase,
                            status: OperatorStatus::Historical,
                            node_wallet: counterparty,
                            chain: entry.chain.clone(),
                            txids,
                            coinbase: Some(info),
                            connection: None,
                            operator: None,
                        }));
                    }
                }

                if !visited.insert(counterparty.clone()) {
                    // Circular path: the wallet was already expanded in
                    // this traversal.
                    self.circular_detections.fetch_add(1, Ordering::Relaxed);
                    Metrics::get().circular_detections.inc();
                    continue;
                }
                if entry.depth + 1 < self.config.max_hops {
                    let mut chain = entry.chain.clone();
                    chain.push(counterparty.clone());
                    queue.push_back(QueueEntry {
                        wallet: counterparty,
                        depth: entry.depth + 1,
                        chain,
                        txids,
                    });
                }
            }
        }
        Ok(None)
    }

    /// Candidate hops out of one wallet: for buys the earliest sends after
    /// the event, for sells the latest receives before it, both bounded by
    /// the multi-hop window and the per-wallet branch cap.
    async fn next_hops(
        &self,
        wallet: &str,
        event: &FlowEvent,
        side: Side,
    ) -> Result<Vec<(String, String)>, FetchError> {
        let txs = self.wallet_transactions(wallet).await?;
        let window = self.config.time_window_blocks;
        let candidates: Vec<AddressTx> = match side {
            Side::Buy => txs
                .iter()
                .filter(|tx| {
                    tx.direction == Direction::Sent
                        && strictly_after(tx, event)
                        && tx.block_height <= event.block_height + window
                })
                .take(self.config.max_branches_per_wallet.max(1))
                .cloned()
                .collect(),
            Side::Sell => txs
                .iter()
                .rev()
                .filter(|tx| {
                    tx.direction == Direction::Received
                        && strictly_before(tx, event)
                        && tx.block_height >= event.block_height - window
                })
                .take(self.config.max_branches_per_wallet.max(1))
                .cloned()
                .collect(),
        };

        let mut hops = Vec::with_capacity(candidates.len());
        for tx in candidates {
            if let Some(counterparty) = self.counterparty(wallet, &tx.txid, side).await? {
                hops.push((counterparty, tx.txid));
            }
        }
        Ok(hops)
    }

    /// The other party of a transaction: for buys the first output address
    /// that is not the wallet itself, for sells the first such input.
    async fn counterparty(
        &self,
        wallet: &str,
        txid: &str,
        side: Side,
    ) -> Result<Option<String>, FetchError> {
        let tx = self.transaction(txid).await?;
        let found = match side {
            Side::Buy => tx
                .vout
                .iter()
                .flat_map(|output| &output.addresses)
                .find(|address| *address != wallet),
            Side::Sell => tx
                .vin
                .iter()
                .flat_map(|input| &input.addresses)
                .find(|address| *address != wallet),
        };
        Ok(found.cloned())
    }

    // Cached upstream lookups.

    async fn wallet_transactions(&self, address: &str) -> Result<Vec<AddressTx>, FetchError> {
        let key = address.to_string();
        if let Some(cached) = self.cache.wallet_transactions.get(&key) {
            return Ok(cached);
        }
        let txs = self.source.get_address_transactions(address).await?;
        self.cache.wallet_transactions.insert(key, txs.clone());
        Ok(txs)
    }

    async fn transaction(&self, txid: &str) -> Result<indexer::ChainTransaction, FetchError> {
        let key = txid.to_string();
        if let Some(cached) = self.cache.transaction_bodies.get(&key) {
            return Ok(cached);
        }
        let tx = self.source.get_transaction(txid).await?;
        self.cache.transaction_bodies.insert(key, tx.clone());
        Ok(tx)
    }

    fn operator_status(&self, address: &str) -> Option<NodeOperator> {
        let key = address.to_string();
        if let Some(cached) = self.cache.operator_status.get(&key) {
            return cached;
        }
        let operator = self.classifier.operator(address);
        self.cache.operator_status.insert(key, operator);
        operator
    }

    /// Turns a hit into the single row update for the unknown side.
    fn build_patch(&self, wallet: &str, hit: &Hit, side: Side) -> ClassificationPatch {
        let now = now_unix();
        let details = match &hit.connection {
            Some(connection) => Details::HistoricalConnection {
                node_wallet: connection.node_wallet.clone(),
                connection_txid: connection.connection_txid.clone(),
                days_ago: (now - connection.connection_timestamp).max(0) / SECONDS_PER_DAY,
                coinbase_count: connection.coinbase_count,
            },
            None => Details::EnhancedNode {
                node_wallet: hit.node_wallet.clone(),
                detection_method: hit.method,
                status: hit.status,
                hop_count: u32::try_from(hit.level).unwrap_or(0),
                intermediary_txids: hit.txids.clone(),
                node_count: hit.operator().map(|operator| operator.node_count),
                tiers: hit.operator().map(|operator| operator.tiers),
                days_inactive: hit
                    .coinbase
                    .map(|info| (now - info.last_timestamp).max(0) / SECONDS_PER_DAY),
                coinbase_count: hit.coinbase.map(|info| info.count),
                last_coinbase_block: hit.coinbase.map(|info| info.last_block),
            },
        };

        let mut patch = ClassificationPatch {
            classification_level: Some(hit.level),
            analysis_timestamp: Some(now),
            data_source: Some(EventSource::Enhanced),
            ..Default::default()
        };
        if hit.level > 0 {
            patch.hop_chain = Some(hit.chain.clone());
            patch.intermediary_wallet = hit.chain.first().cloned();
        }
        match side {
            Side::Buy => {
                patch.to_type = Some(AddressType::NodeOperator);
                patch.to_details = Some(details);
            }
            Side::Sell => {
                patch.from_type = Some(AddressType::NodeOperator);
                patch.from_details = Some(details);
            }
        }
        tracing::trace!(wallet, level = hit.level, "built classification patch");
        patch
    }
}

impl Hit {
    fn operator(&self) -> Option<NodeOperator> {
        self.operator
    }
}

fn strictly_after(tx: &AddressTx, event: &FlowEvent) -> bool {
    tx.block_height > event.block_height
        || (tx.block_height == event.block_height && tx.timestamp > event.block_time)
}

fn strictly_before(tx: &AddressTx, event: &FlowEvent) -> bool {
    tx.block_height < event.block_height
        || (tx.block_height == event.block_height && tx.timestamp < event.block_time)
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "enhancement")]
struct Metrics {
    /// Completed enhancement runs.
    runs: prometheus::IntCounter,

    /// Events rewritten with a node operator classification.
    events_enhanced: prometheus::IntCounter,

    /// Events that stayed unknown after analysis.
    events_unknown: prometheus::IntCounter,

    /// BFS expansions suppressed because the wallet was already visited.
    circular_detections: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Self::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
