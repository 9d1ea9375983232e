use {
    prometheus::{Encoder, Registry, TextEncoder},
    prometheus_metric_storage::StorageRegistry,
    std::{net::SocketAddr, sync::OnceLock},
};

static REGISTRY: OnceLock<StorageRegistry> = OnceLock::new();

/// Configures the global registry with an optional metric name prefix. Must
/// be called before the first `get_storage_registry` to take effect.
pub fn setup_registry(prefix: Option<String>) {
    let registry = Registry::new_custom(prefix, None).expect("invalid metrics prefix");
    let _ = REGISTRY.set(StorageRegistry::new(registry));
}

/// The storage registry every component resolves its `Metrics` struct
/// against.
pub fn get_storage_registry() -> &'static StorageRegistry {
    REGISTRY.get_or_init(|| {
        StorageRegistry::new(Registry::new_custom(None, None).expect("default registry"))
    })
}

pub fn get_registry() -> &'static Registry {
    get_storage_registry().registry()
}

/// Serves the prometheus scrape endpoint until the process exits.
pub async fn serve_metrics(address: SocketAddr) -> anyhow::Result<()> {
    let app = axum::Router::new().route("/metrics", axum::routing::get(handle_metrics));
    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!(%address, "serving metrics");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_metrics() -> String {
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&get_registry().gather(), &mut buffer) {
        tracing::warn!(?err, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
