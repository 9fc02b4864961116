//! Wallet resolver worker pool.
//!
//! Workers drain the refresh queue, fetch the wallet's user contract state
//! from the chain, decode the principal table and upsert the snapshot.
//! Failed fetches are requeued with their dedup entry kept live; fatal
//! decode failures are dropped, the periodic reindexer picks them up later.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use log::{info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::boc::from_boc_base64;
use crate::client::TonCenterClient;
use crate::db::models::OnchainUser;
use crate::db::PostgresClient;
use crate::pools::{self, PoolSpec};
use crate::queue::{UpdateQueue, WalletRefresh};
use crate::utils::now_unix;
use crate::worker::user_sc::{self, UserAccountState};

/// A refresh younger than this may race the chain's propagation lag.
pub const DELAY_BUFFER_SECS: i64 = 30;

/// How long a too-fresh job waits before the state fetch.
pub const SLEEP_TIME: Duration = Duration::from_secs(30);

pub struct WalletResolver {
    db: Arc<PostgresClient>,
    client: Arc<TonCenterClient>,
    queue: Arc<UpdateQueue>,
}

impl WalletResolver {
    pub fn new(
        db: Arc<PostgresClient>,
        client: Arc<TonCenterClient>,
        queue: Arc<UpdateQueue>,
    ) -> Self {
        Self { db, client, queue }
    }

    /// Spawn `count` workers sharing the job receiver. Each worker finishes
    /// its current job after the shutdown broadcast fires, then returns.
    pub fn spawn_workers(
        self: Arc<Self>,
        count: usize,
        rx: mpsc::Receiver<WalletRefresh>,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(Mutex::new(rx));
        (0..count)
            .map(|_| {
                let resolver = self.clone();
                let rx = rx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        let job = tokio::select! {
                            _ = shutdown.cancelled() => {
                                info!("Worker received shutdown signal, finishing current task");
                                return;
                            }
                            job = async { rx.lock().await.recv().await } => match job {
                                Some(job) => job,
                                None => return,
                            },
                        };
                        resolver.process_job(job).await;
                    }
                })
            })
            .collect()
    }

    pub async fn process_job(&self, job: WalletRefresh) {
        // absorb propagation lag: the user contract must have observed the
        // triggering transaction before we read its state
        if needs_settling_delay(job.tx_utime, now_unix()) {
            tokio::time::sleep(SLEEP_TIME).await;
        }

        let Some(pool) = pools::get(&job.pool.name) else {
            warn!("job for unknown pool {:?}, dropping", job.pool.name);
            self.queue.complete(&job.address, &job.pool.name);
            return;
        };

        let wallet = match job.address.parse() {
            Ok(wallet) => wallet,
            Err(e) => {
                warn!("unparseable wallet address {:?}: {e}, dropping", job.address);
                self.queue.complete(&job.address, &job.pool.name);
                return;
            }
        };
        let contract_address = pool.user_contract_address(&wallet).to_friendly();

        let states = match self.client.fetch_account_states(&[contract_address.clone()]).await {
            Ok(states) => states,
            Err(e) => {
                warn!("failed to get state for {contract_address}: {e:#}, requeueing");
                self.queue.requeue(job).await;
                return;
            }
        };

        let boc = states.get(&contract_address).map(String::as_str).unwrap_or_default();
        if boc.is_empty() {
            warn!(
                "empty state for {} ({} in pool {}), requeueing",
                contract_address, job.address, job.pool.name
            );
            self.queue.requeue(job).await;
            return;
        }

        match apply_account_state(
            &self.db,
            pool,
            &job.address,
            &contract_address,
            boc,
            job.tx_utime,
            job.enqueued_at,
        )
        .await
        {
            Ok(()) => {
                if job.enqueued_at < job.tx_utime + DELAY_BUFFER_SECS {
                    info!("user {contract_address} updated");
                }
            }
            Err(e) => {
                // fatal decode or storage error: the reindex sweep is the
                // safety net for this wallet
                warn!("failed to apply state for {contract_address}: {e:#}, dropping");
            }
        }
        self.queue.complete(&job.address, &job.pool.name);
    }
}

/// Decode a user contract state BOC and upsert the wallet snapshot. Shared
/// by workers and the periodic reindexer.
pub async fn apply_account_state(
    db: &PostgresClient,
    pool: &'static PoolSpec,
    wallet_address: &str,
    contract_address: &str,
    boc: &str,
    tx_utime: i64,
    enqueued_at: i64,
) -> Result<()> {
    let root = from_boc_base64(boc).context("undecodable account state boc")?;
    let state = user_sc::parse_account_state(&root).context("unparseable user contract data")?;

    let user = compose_user(pool, wallet_address, contract_address, state, tx_utime, enqueued_at);
    db.upsert_user(&user).await
}

/// Shape the decoded state into a storable snapshot: principals are
/// normalised to the pool's full asset catalogue (zero when absent
/// on-chain, unknown extras dropped) and `updated_at` falls back to the
/// enqueue time for stale jobs.
fn compose_user(
    pool: &PoolSpec,
    wallet_address: &str,
    contract_address: &str,
    state: UserAccountState,
    tx_utime: i64,
    enqueued_at: i64,
) -> OnchainUser {
    let mut principals: BTreeMap<String, String> = pool
        .assets()
        .iter()
        .map(|asset| (asset.to_string(), "0".to_string()))
        .collect();
    for (asset, principal) in state.principals {
        let key = asset.to_string();
        if let Some(entry) = principals.get_mut(&key) {
            *entry = principal.to_string();
        }
    }

    let updated_at = if enqueued_at > tx_utime + DELAY_BUFFER_SECS { enqueued_at } else { tx_utime };

    OnchainUser {
        wallet_address: wallet_address.to_string(),
        pool: pool.name.to_string(),
        contract_address: contract_address.to_string(),
        code_version: state.code_version,
        state: state.user_state,
        principals,
        created_at: timestamp(tx_utime),
        updated_at: timestamp(updated_at),
    }
}

fn timestamp(unix: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(unix, 0).single().unwrap_or_else(Utc::now)
}

/// A job triggered by a transaction less than one delay buffer ago must wait
/// before the state fetch.
fn needs_settling_delay(tx_utime: i64, now: i64) -> bool {
    tx_utime > now - DELAY_BUFFER_SECS
}
