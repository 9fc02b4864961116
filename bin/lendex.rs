use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use jemallocator::Jemalloc;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use lendex::config::Mode;
use lendex::{
    pools, queue, CronScheduler, CronSettings, PoolTailer, PostgresClient, Settings,
    TokenBucketLimiter, TonCenterClient, WalletResolver,
};

const TONCENTER_BASE_URL: &str = "https://toncenter.com";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    // Load configuration
    let settings = Settings::new()
        .context("Failed to load config.yaml. Please ensure it exists and is valid")?;
    if settings.mode != Mode::Indexer {
        bail!("only indexer mode is supported by this binary");
    }

    let db = Arc::new(
        PostgresClient::new(&settings.db)
            .await
            .context("Failed to initialize database connection")?,
    );

    if settings.migrate_on_start {
        db.migrate().await.context("Migration failed")?;
    }

    let snapshot_path = Path::new(queue::SNAPSHOT_FILE);
    if settings.force_resync_on_every_start {
        info!("Force resync enabled, truncating all indexer tables");
        db.truncate_indexer_tables()
            .await
            .context("Failed to truncate indexer tables")?;
        if snapshot_path.exists() {
            std::fs::remove_file(snapshot_path)
                .context("Failed to remove stale queue snapshot")?;
        }
    }

    for pool in pools::all() {
        db.seed_sync_state(pool.name, pool.initial_utime).await?;
    }

    let limiter = Arc::new(TokenBucketLimiter::new(
        settings.toncenter_rps,
        settings.toncenter_burst,
    ));
    let client = Arc::new(TonCenterClient::new(
        TONCENTER_BASE_URL,
        settings.toncenter_api_key.clone(),
        limiter,
    )?);

    let (update_queue, job_rx) = queue::channel();
    if !settings.force_resync_on_every_start {
        if let Err(e) = update_queue.restore(snapshot_path).await {
            warn!("Failed to restore queue snapshot: {e:#}");
        }
    }

    let cancellation_token = CancellationToken::new();
    let worker_shutdown = CancellationToken::new();

    // Resolver worker pool
    let resolver = Arc::new(WalletResolver::new(
        db.clone(),
        client.clone(),
        update_queue.clone(),
    ));
    let worker_handles =
        resolver.spawn_workers(settings.user_sync_workers, job_rx, worker_shutdown.clone());
    info!("Started {} wallet resolver workers", settings.user_sync_workers);

    // One tailer per pool
    let mut tailer_handles = Vec::new();
    for pool in pools::all() {
        let tailer = PoolTailer::new(
            db.clone(),
            client.clone(),
            update_queue.clone(),
            pool,
            settings.max_page_size,
        );
        let token = cancellation_token.child_token();
        tailer_handles.push(tokio::spawn(async move {
            if let Err(e) = tailer.run(token).await {
                error!("Tailer failed: {e:#}");
            }
        }));
    }

    // Periodic full reindex
    let cron_scheduler = CronScheduler::new(db.clone(), client.clone(), CronSettings::default());
    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {e:#}");
        }
    });

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Indexer running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
    }

    // Stop tailers and the reindexer first so nothing new is enqueued.
    cancellation_token.cancel();
    for handle in tailer_handles {
        let _ = handle.await;
    }
    let _ = cron_handle.await;

    // Workers finish their current job, then the live set is snapshotted.
    info!("Waiting for resolver workers to drain...");
    worker_shutdown.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }

    if let Err(e) = update_queue.save(snapshot_path) {
        error!("Failed to save queue snapshot: {e:#}");
    }

    info!("Shutdown complete");
    Ok(())
}
