//! The two periodic drivers: block ingestion and background enhancement.
//! Each loop owns its own timer; overlap within a loop is prevented by the
//! component itself (the pipeline's running flag, serial awaits here). On
//! shutdown no new tick is armed and the in-flight tick finishes.

use {
    crate::{config::BackgroundJob, shutdown::ShutdownController},
    database::Store,
    enhancement::Engine,
    ingestion::SyncPipeline,
    std::{sync::Arc, time::Duration},
    tokio::time::{self, MissedTickBehavior},
};

pub async fn run_schedulers(
    pipeline: Arc<SyncPipeline>,
    engine: Arc<Engine>,
    store: Store,
    sync_interval: Duration,
    background_job: BackgroundJob,
    failed_retry: Duration,
    shutdown: ShutdownController,
) {
    let sync = tokio::spawn(sync_loop(pipeline, sync_interval, shutdown.clone()));
    let enhance = tokio::spawn(enhancement_loop(
        engine,
        store,
        background_job,
        failed_retry,
        shutdown,
    ));
    let _ = tokio::join!(sync, enhance);
    tracing::info!("schedulers stopped");
}

async fn sync_loop(pipeline: Arc<SyncPipeline>, period: Duration, mut shutdown: ShutdownController) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.wait() => break,
        }
        if let Err(err) = pipeline.run_tick().await {
            tracing::error!(?err, "sync tick failed");
        }
        if shutdown.should_shutdown() {
            break;
        }
    }
    tracing::info!("sync scheduler stopped");
}

async fn enhancement_loop(
    engine: Arc<Engine>,
    store: Store,
    config: BackgroundJob,
    failed_retry: Duration,
    mut shutdown: ShutdownController,
) {
    if !config.enabled {
        tracing::info!("background enhancement disabled");
        return;
    }
    let period = Duration::from_secs(config.interval_minutes.max(1) * 60);
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut first = true;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.wait() => break,
        }
        let skip_first = first && !config.run_on_start;
        first = false;
        if !skip_first {
            run_once(&engine, &store, &config, failed_retry).await;
        }
        if shutdown.should_shutdown() {
            break;
        }
    }
    tracing::info!("enhancement scheduler stopped");
}

/// Skips the run entirely while there is too little to do; the unknowns
/// count is re-derived from the store every tick.
async fn run_once(engine: &Engine, store: &Store, config: &BackgroundJob, failed_retry: Duration) {
    let pending = match store.get_unknown_wallets(failed_retry).await {
        Ok(unknowns) => unknowns.total(),
        Err(err) => {
            tracing::warn!(?err, "failed to count unknown wallets");
            return;
        }
    };
    if pending < config.min_unknowns_threshold {
        tracing::debug!(
            pending,
            threshold = config.min_unknowns_threshold,
            "skipping enhancement run"
        );
        return;
    }
    if let Err(err) = engine.enhance_unknowns().await {
        tracing::error!(?err, "enhancement run failed");
    }
}
