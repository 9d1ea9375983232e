//! Constant time address classification against the static exchange and
//! foundation books and the periodically refreshed node operator registry.

pub mod book;
pub mod registry;

pub use {
    book::AddressBook,
    registry::{NodeOperator, RegistryRecord},
};

use {
    arc_swap::ArcSwap,
    model::{AddressType, Classification, Details},
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    },
    url::Url,
};

pub struct Classifier {
    book: AddressBook,
    /// Complete snapshot, replaced wholesale on refresh so readers never see
    /// a partially updated set.
    operators: ArcSwap<HashMap<String, NodeOperator>>,
    registry_url: Url,
    client: reqwest::Client,
    last_refresh: Mutex<Option<Instant>>,
}

impl Classifier {
    pub fn new(book: AddressBook, registry_url: Url, client: reqwest::Client) -> Self {
        Self {
            book,
            operators: ArcSwap::from_pointee(HashMap::new()),
            registry_url,
            client,
            last_refresh: Mutex::new(None),
        }
    }

    /// Classifies one address. Evaluation order is exchange, foundation,
    /// node operator, unknown; an address present in several sets keeps the
    /// first match.
    pub fn classify(&self, address: &str) -> Classification {
        if let Some(info) = self.book.exchanges.get(address) {
            return Classification {
                address_type: AddressType::Exchange,
                details: Some(Details::Exchange {
                    name: info.name.clone(),
                    logo: info.logo.clone(),
                }),
            };
        }
        if let Some(info) = self.book.foundation.get(address) {
            return Classification {
                address_type: AddressType::Foundation,
                details: Some(Details::Foundation {
                    name: info.name.clone(),
                }),
            };
        }
        if let Some(operator) = self.operator(address) {
            return Classification {
                address_type: AddressType::NodeOperator,
                details: Some(Details::Node {
                    node_count: operator.node_count,
                    tiers: operator.tiers,
                }),
            };
        }
        Classification::unknown()
    }

    /// Current registry snapshot entry for the address, if it operates
    /// nodes right now.
    pub fn operator(&self, address: &str) -> Option<NodeOperator> {
        self.operators.load().get(address).copied()
    }

    pub fn operator_count(&self) -> usize {
        self.operators.load().len()
    }

    /// Fetches the registry and replaces the snapshot. Fail-open: any error
    /// is logged and the previous snapshot keeps serving.
    pub async fn refresh_node_operators(&self) {
        match self.try_refresh().await {
            Ok(count) => {
                Metrics::get().refreshes.with_label_values(&["ok"]).inc();
                tracing::debug!(operators = count, "refreshed node operator registry");
            }
            Err(err) => {
                Metrics::get().refreshes.with_label_values(&["error"]).inc();
                tracing::warn!(?err, "node operator refresh failed, keeping previous snapshot");
            }
        }
    }

    async fn try_refresh(&self) -> anyhow::Result<usize> {
        let raw = self
            .client
            .get(self.registry_url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let records = registry::parse_registry(&raw)?;
        let operators = registry::group_operators(records);
        Ok(self.install_operators(operators))
    }

    /// Atomically swaps in a fully built snapshot and stamps the refresh
    /// time.
    pub fn install_operators(&self, operators: HashMap<String, NodeOperator>) -> usize {
        let count = operators.len();
        self.operators.store(Arc::new(operators));
        *self.last_refresh.lock().unwrap() = Some(Instant::now());
        count
    }

    /// Whether the snapshot is older than `max_age` (or was never loaded).
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match *self.last_refresh.lock().unwrap() {
            Some(at) => at.elapsed() > max_age,
            None => true,
        }
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "classifier")]
struct Metrics {
    /// Node operator registry refresh outcomes.
    #[metric(labels("result"))]
    refreshes: prometheus::IntCounterVec,
}

impl Metrics {
    fn get() -> &'static Self {
        Self::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
