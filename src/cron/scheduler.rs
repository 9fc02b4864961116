//! Cron scheduler for the periodic full reindex.
//!
//! The sweep runs once at startup and then on a fixed interval until
//! cancellation.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::client::TonCenterClient;
use crate::db::PostgresClient;

use super::jobs;

pub struct CronScheduler {
    db: Arc<PostgresClient>,
    client: Arc<TonCenterClient>,
    settings: CronSettings,
}

#[derive(Debug, Clone)]
pub struct CronSettings {
    /// Interval of the full wallet reindex sweep.
    pub reindex_interval_secs: u64,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            reindex_interval_secs: 86_400, // 24 hours
        }
    }
}

impl CronScheduler {
    pub fn new(db: Arc<PostgresClient>, client: Arc<TonCenterClient>, settings: CronSettings) -> Self {
        Self { db, client, settings }
    }

    /// Runs until cancellation.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        // initial sweep on start
        if let Err(e) = jobs::reindex_wallets::run(&self.db, &self.client, &token).await {
            error!("Initial reindex sweep failed: {e:#}");
        }
        if token.is_cancelled() {
            return Ok(());
        }

        let mut scheduler = JobScheduler::new().await?;
        self.register_reindex_job(&scheduler, &token).await?;

        scheduler.start().await?;
        info!("Cron scheduler started");

        token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_reindex_job(
        &self,
        scheduler: &JobScheduler,
        token: &CancellationToken,
    ) -> Result<()> {
        let db = self.db.clone();
        let client = self.client.clone();
        let token = token.clone();
        let interval = self.settings.reindex_interval_secs;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let db = db.clone();
                let client = client.clone();
                let token = token.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::reindex_wallets::run(&db, &client, &token).await {
                        error!("Reindex sweep failed: {e:#}");
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered reindex_wallets job (every {interval}s)");
        Ok(())
    }
}
