use {
    crate::{arguments::Arguments, config::Configuration, schedulers, shutdown::ShutdownController},
    anyhow::Context,
    classifier::{AddressBook, Classifier},
    clap::Parser,
    database::Store,
    enhancement::{Engine, EnhancementCache},
    indexer::{FallbackSource, IndexerClient, PrimarySource, client::DataSource},
    ingestion::SyncPipeline,
    std::{sync::Arc, time::Duration},
};

pub async fn start(args: impl Iterator<Item = String>) {
    let args = Arguments::parse_from(args);
    observe::tracing::initialize(&args.log_filter);
    observe::panic_hook::install();
    observe::metrics::setup_registry(Some("fluxflow".to_string()));
    tracing::info!("running fluxflow with {args:#?}");
    if let Err(err) = run(args).await {
        tracing::error!(?err, "startup failed");
        std::process::exit(1);
    }
}

async fn run(args: Arguments) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => Configuration::from_path(path)
            .await
            .with_context(|| format!("reading configuration {path:?}"))?,
        None => Configuration::default(),
    }
    .validate()
    .context("invalid configuration")?;
    tracing::info!(
        retention_window_blocks = config.retention_window_blocks,
        periods = ?config.periods,
        "configuration loaded"
    );

    let store = Store::open(&args.db_path)
        .await
        .with_context(|| format!("opening database {:?}", args.db_path))?;

    let book = AddressBook::from_path(&args.address_book)
        .with_context(|| format!("loading address book {:?}", args.address_book))?;
    tracing::info!(
        exchanges = book.exchanges.len(),
        foundation = book.foundation.len(),
        "address book loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building http client")?;
    let classifier = Arc::new(Classifier::new(book, args.node_registry_url, http.clone()));
    classifier.refresh_node_operators().await;
    tracing::info!(operators = classifier.operator_count(), "initial registry snapshot");

    let primary = PrimarySource::new(
        args.primary_indexer_url,
        http.clone(),
        config.primary_settings(),
    );
    let fallback = FallbackSource::new(args.fallback_indexer_url, http, config.fallback_settings());
    let client: Arc<dyn DataSource> = Arc::new(IndexerClient::new(
        Arc::new(primary),
        Arc::new(fallback),
        config.active_source(),
    ));

    let pipeline = Arc::new(SyncPipeline::new(
        client.clone(),
        classifier.clone(),
        store.clone(),
        config.retention_window_blocks,
    ));
    let engine_config = config.enhancement_config();
    let failed_retry = engine_config.failed_retry;
    let engine = Arc::new(Engine::new(
        client,
        classifier,
        store.clone(),
        EnhancementCache::default(),
        engine_config,
    ));

    tokio::spawn(async move {
        if let Err(err) = observe::metrics::serve_metrics(args.metrics_address).await {
            tracing::error!(?err, "metrics server exited");
        }
    });
    tokio::spawn(database::store::database_metrics(store.clone()));

    let shutdown = ShutdownController::new_shutdown_on_signal();
    schedulers::run_schedulers(
        pipeline,
        engine,
        store,
        args.sync_interval,
        config.enhancement.background_job,
        failed_retry,
        shutdown,
    )
    .await;
    Ok(())
}
