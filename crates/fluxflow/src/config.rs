//! The TOML configuration tree. Process level knobs (paths, URLs, the sync
//! interval) live on the command line; everything tuning the pipeline and
//! the enhancement engine lives here. Unknown keys and invariant violations
//! are fatal before any scheduler arms.

use {
    anyhow::ensure,
    enhancement::EnhancementConfig,
    indexer::{SourceKind, SourceSettings},
    serde::Deserialize,
    std::{collections::BTreeMap, path::Path, time::Duration},
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct Configuration {
    /// Chain block time, the basis for period math.
    #[serde(default = "defaults::block_time_seconds")]
    pub block_time_seconds: u64,

    /// Named time windows (label to block count) offered by the analytics
    /// queries.
    #[serde(default = "defaults::periods")]
    pub periods: BTreeMap<String, i64>,

    /// Which source the indexer client starts on.
    #[serde(default)]
    pub active_data_source: ActiveDataSource,

    /// Rolling retention window in blocks; rows below the window are swept.
    #[serde(default = "defaults::retention_window_blocks")]
    pub retention_window_blocks: i64,

    #[serde(default)]
    pub sources: Sources,

    #[serde(default)]
    pub enhancement: Enhancement,
}

impl Default for Configuration {
    fn default() -> Self {
        toml::from_str("").expect("empty configuration deserializes")
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ActiveDataSource {
    #[default]
    Primary,
    Fallback,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sources {
    #[serde(default)]
    pub primary: SourceTuning,
    #[serde(default)]
    pub fallback: SourceTuning,
}

/// Optional overrides on top of the built-in per-source profiles.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceTuning {
    pub batch_size: Option<usize>,
    pub max_concurrent: Option<usize>,
    #[serde(default, with = "humantime_serde::option")]
    pub min_request_delay: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub batch_delay: Option<Duration>,
    pub enable_rate_limiting: Option<bool>,
    pub transaction_fetch_limit: Option<usize>,
    #[serde(default, with = "humantime_serde::option")]
    pub request_timeout: Option<Duration>,
}

impl SourceTuning {
    fn apply(&self, mut base: SourceSettings) -> SourceSettings {
        if let Some(batch_size) = self.batch_size {
            base.batch_size = batch_size;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            base.max_concurrent = max_concurrent;
        }
        if let Some(delay) = self.min_request_delay {
            base.min_request_delay = delay;
        }
        if let Some(delay) = self.batch_delay {
            base.batch_delay = delay;
        }
        if let Some(rate_limited) = self.enable_rate_limiting {
            base.rate_limited = rate_limited;
        }
        if let Some(limit) = self.transaction_fetch_limit {
            base.tx_fetch_limit = limit;
        }
        if let Some(timeout) = self.request_timeout {
            base.request_timeout = timeout;
        }
        base
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Enhancement {
    #[serde(default = "defaults::max_hops")]
    pub max_hops: u32,
    #[serde(default = "defaults::time_window_blocks")]
    pub time_window_blocks: i64,
    #[serde(default = "defaults::min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "defaults::failed_retry_hours")]
    pub failed_retry_hours: u64,
    #[serde(default)]
    pub background_job: BackgroundJob,
    #[serde(default)]
    pub multi_hop: MultiHop,
    #[serde(default)]
    pub historical_detection: HistoricalDetection,
    #[serde(default)]
    pub historical_connections: HistoricalConnections,
    #[serde(default)]
    pub parallel_processing: ParallelProcessing,
}

impl Default for Enhancement {
    fn default() -> Self {
        toml::from_str("").expect("empty enhancement section deserializes")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackgroundJob {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
    #[serde(default = "defaults::interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default)]
    pub run_on_start: bool,
    #[serde(default = "defaults::min_unknowns_threshold")]
    pub min_unknowns_threshold: usize,
}

impl Default for BackgroundJob {
    fn default() -> Self {
        toml::from_str("").expect("empty background job section deserializes")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiHop {
    /// Search depth actually used; defaults to `enhancement.max_hops`.
    pub default_depth: Option<u32>,
    #[serde(default = "defaults::max_depth")]
    pub max_depth: u32,
    /// Window override for multi-hop candidate transactions.
    pub time_window_blocks: Option<i64>,
    #[serde(default = "defaults::max_branches_per_wallet")]
    pub max_branches_per_wallet: usize,
}

impl Default for MultiHop {
    fn default() -> Self {
        toml::from_str("").expect("empty multi hop section deserializes")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoricalDetection {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
    #[serde(default = "defaults::historical_window_blocks")]
    pub time_window_blocks: i64,
}

impl Default for HistoricalDetection {
    fn default() -> Self {
        toml::from_str("").expect("empty historical detection section deserializes")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoricalConnections {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
}

impl Default for HistoricalConnections {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelProcessing {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
    #[serde(default = "defaults::parallel_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for ParallelProcessing {
    fn default() -> Self {
        toml::from_str("").expect("empty parallel processing section deserializes")
    }
}

mod defaults {
    use std::collections::BTreeMap;

    pub fn block_time_seconds() -> u64 {
        30
    }

    pub fn periods() -> BTreeMap<String, i64> {
        BTreeMap::from([
            ("24h".to_string(), 2_880),
            ("7d".to_string(), 20_160),
            ("30d".to_string(), 86_400),
        ])
    }

    pub fn retention_window_blocks() -> i64 {
        86_400
    }

    pub fn max_hops() -> u32 {
        2
    }

    pub fn time_window_blocks() -> i64 {
        2_880
    }

    pub fn min_confidence() -> f64 {
        0.5
    }

    pub fn failed_retry_hours() -> u64 {
        6
    }

    pub fn enabled() -> bool {
        true
    }

    pub fn interval_minutes() -> u64 {
        15
    }

    pub fn min_unknowns_threshold() -> usize {
        5
    }

    pub fn max_depth() -> u32 {
        4
    }

    pub fn max_branches_per_wallet() -> usize {
        3
    }

    pub fn historical_window_blocks() -> i64 {
        1_051_200
    }

    pub fn batch_size() -> usize {
        5
    }

    pub fn parallel_max_concurrent() -> usize {
        8
    }
}

impl Configuration {
    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        ensure!(self.block_time_seconds > 0, "block_time_seconds must be positive");
        ensure!(!self.periods.is_empty(), "periods must not be empty");
        ensure!(
            self.periods.values().all(|blocks| *blocks > 0),
            "period block counts must be positive"
        );
        ensure!(
            self.retention_window_blocks > 0,
            "retention_window_blocks must be positive"
        );
        let enhancement = &self.enhancement;
        ensure!(enhancement.max_hops >= 1, "enhancement.max_hops must be at least 1");
        ensure!(
            (0.0..=1.0).contains(&enhancement.min_confidence),
            "enhancement.min_confidence must be within [0, 1]"
        );
        if let Some(depth) = enhancement.multi_hop.default_depth {
            ensure!(
                depth <= enhancement.multi_hop.max_depth,
                "multi_hop.default_depth exceeds multi_hop.max_depth"
            );
        }
        ensure!(
            enhancement.parallel_processing.batch_size >= 1,
            "parallel_processing.batch_size must be at least 1"
        );
        ensure!(
            enhancement.parallel_processing.max_concurrent >= 1,
            "parallel_processing.max_concurrent must be at least 1"
        );
        Ok(self)
    }

    pub fn active_source(&self) -> SourceKind {
        match self.active_data_source {
            ActiveDataSource::Primary => SourceKind::Primary,
            ActiveDataSource::Fallback => SourceKind::Fallback,
        }
    }

    pub fn primary_settings(&self) -> SourceSettings {
        self.sources.primary.apply(SourceSettings::primary())
    }

    pub fn fallback_settings(&self) -> SourceSettings {
        self.sources.fallback.apply(SourceSettings::fallback())
    }

    /// Collapses the nested tuning tree into the engine's flat config.
    pub fn enhancement_config(&self) -> EnhancementConfig {
        let enhancement = &self.enhancement;
        let depth = enhancement
            .multi_hop
            .default_depth
            .unwrap_or(enhancement.max_hops)
            .min(enhancement.multi_hop.max_depth);
        let parallel = &enhancement.parallel_processing;
        EnhancementConfig {
            max_hops: depth,
            time_window_blocks: enhancement
                .multi_hop
                .time_window_blocks
                .unwrap_or(enhancement.time_window_blocks),
            failed_retry: Duration::from_secs(enhancement.failed_retry_hours * 3600),
            historical_detection: enhancement.historical_detection.enabled,
            historical_window_blocks: enhancement.historical_detection.time_window_blocks,
            historical_connections: enhancement.historical_connections.enabled,
            max_branches_per_wallet: enhancement.multi_hop.max_branches_per_wallet,
            min_confidence: enhancement.min_confidence,
            parallel: parallel.enabled,
            // Events per batch never exceed the concurrency cap, so one
            // batch is one concurrent wave.
            batch_size: parallel.batch_size.min(parallel.max_concurrent),
        }
    }

    pub fn background_job(&self) -> &BackgroundJob {
        &self.enhancement.background_job
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_configuration_uses_defaults() {
        let config: Configuration = toml::from_str("").unwrap();
        let config = config.validate().unwrap();
        assert_eq!(config.block_time_seconds, 30);
        assert_eq!(config.retention_window_blocks, 86_400);
        assert_eq!(config.active_source(), SourceKind::Primary);
        assert_eq!(config.periods["24h"], 2_880);
        assert!(config.background_job().enabled);

        let engine = config.enhancement_config();
        assert_eq!(engine.max_hops, 2);
        assert!(engine.historical_detection);
        assert_eq!(engine.batch_size, 5);
    }

    #[test]
    fn full_configuration_round_trips() {
        let config: Configuration = toml::from_str(
            r#"
                block_time_seconds = 30
                retention_window_blocks = 20160
                active_data_source = "fallback"

                [periods]
                "24h" = 2880
                "7d" = 20160

                [sources.primary]
                batch_size = 100
                max_concurrent = 20
                min_request_delay = "10ms"

                [sources.fallback]
                batch_size = 5
                batch_delay = "3s"
                enable_rate_limiting = true
                transaction_fetch_limit = 25

                [enhancement]
                max_hops = 3
                time_window_blocks = 5760
                min_confidence = 0.7
                failed_retry_hours = 12

                [enhancement.background_job]
                enabled = true
                interval_minutes = 30
                run_on_start = true
                min_unknowns_threshold = 10

                [enhancement.multi_hop]
                default_depth = 2
                max_depth = 4
                time_window_blocks = 1440
                max_branches_per_wallet = 2

                [enhancement.historical_detection]
                enabled = true
                time_window_blocks = 525600

                [enhancement.historical_connections]
                enabled = false

                [enhancement.parallel_processing]
                enabled = true
                batch_size = 8
                max_concurrent = 4
            "#,
        )
        .unwrap();
        let config = config.validate().unwrap();

        assert_eq!(config.active_source(), SourceKind::Fallback);
        let primary = config.primary_settings();
        assert_eq!(primary.batch_size, 100);
        assert_eq!(primary.max_concurrent, 20);
        assert_eq!(primary.min_request_delay, Duration::from_millis(10));
        assert!(!primary.rate_limited);
        let fallback = config.fallback_settings();
        assert_eq!(fallback.batch_size, 5);
        assert_eq!(fallback.batch_delay, Duration::from_secs(3));
        assert_eq!(fallback.tx_fetch_limit, 25);

        let engine = config.enhancement_config();
        assert_eq!(engine.max_hops, 2);
        assert_eq!(engine.time_window_blocks, 1440);
        assert_eq!(engine.failed_retry, Duration::from_secs(12 * 3600));
        assert_eq!(engine.historical_window_blocks, 525_600);
        assert!(!engine.historical_connections);
        assert_eq!(engine.max_branches_per_wallet, 2);
        assert_eq!(engine.min_confidence, 0.7);
        // Bounded by the concurrency cap.
        assert_eq!(engine.batch_size, 4);

        assert_eq!(config.background_job().interval_minutes, 30);
        assert!(config.background_job().run_on_start);
    }

    #[tokio::test]
    async fn reads_configuration_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fluxflow.toml");
        std::fs::write(&path, "retention_window_blocks = 1440\n").unwrap();
        let config = Configuration::from_path(&path).await.unwrap();
        assert_eq!(config.retention_window_blocks, 1440);

        assert!(Configuration::from_path(&dir.path().join("missing.toml"))
            .await
            .is_err());
    }

    #[test]
    fn unknown_keys_are_fatal() {
        assert!(toml::from_str::<Configuration>("mempool = true").is_err());
        assert!(
            toml::from_str::<Configuration>("[enhancement]\nmax_hopss = 3").is_err()
        );
    }

    #[test]
    fn invariant_violations_are_fatal() {
        let config: Configuration =
            toml::from_str("[enhancement.multi_hop]\ndefault_depth = 9\nmax_depth = 4").unwrap();
        assert!(config.validate().is_err());

        let config: Configuration = toml::from_str("retention_window_blocks = 0").unwrap();
        assert!(config.validate().is_err());

        let config: Configuration = toml::from_str("[enhancement]\nmin_confidence = 1.5").unwrap();
        assert!(config.validate().is_err());
    }
}
