//! Per-pool log tailer.
//!
//! One tailer loop per pool drives the sync cursor forward in 31-day
//! windows: page through the master's external-out messages, decode, batch
//! insert, enqueue wallet refreshes, persist the cursor. Events are inserted
//! before the cursor is saved, so a crash in between re-ingests idempotently
//! on restart.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::client::{OutMessage, TonCenterClient};
use crate::db::models::OnchainLog;
use crate::db::PostgresClient;
use crate::pools::PoolSpec;
use crate::queue::{PoolRef, UpdateQueue, WalletRefresh};
use crate::utils::{now_unix, tx_hash_hex};
use crate::worker::parser::{parse_log_message, ParseLogError};

/// Window width in seconds: one fetch iteration covers at most 31 days.
pub const UTIME_ADDENDUM: i64 = 60 * 60 * 24 * 31;

/// Consecutive page failures tolerated before the iteration aborts.
const MAX_PAGE_FAILURES: u32 = 5;

/// Sleep after an iteration that found nothing (caught up with the chain).
const WAIT_SLEEP: Duration = Duration::from_secs(10);

/// Sleep between ordinary iterations.
const STEP_SLEEP: Duration = Duration::from_secs(1);

pub struct PoolTailer {
    db: Arc<PostgresClient>,
    client: Arc<TonCenterClient>,
    queue: Arc<UpdateQueue>,
    pool: &'static PoolSpec,
    page_size: usize,
}

impl PoolTailer {
    pub fn new(
        db: Arc<PostgresClient>,
        client: Arc<TonCenterClient>,
        queue: Arc<UpdateQueue>,
        pool: &'static PoolSpec,
        page_size: usize,
    ) -> Self {
        Self { db, client, queue, pool, page_size }
    }

    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!("Starting {} tailer", self.pool.name);
        loop {
            if token.is_cancelled() {
                info!("{} tailer received cancellation signal", self.pool.name);
                return Ok(());
            }

            match self.process_once().await {
                Ok(caught_up) => {
                    if caught_up && sleep_or_cancelled(&token, WAIT_SLEEP).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    error!("{} tailer iteration failed: {e:#}", self.pool.name);
                }
            }

            if sleep_or_cancelled(&token, STEP_SLEEP).await {
                return Ok(());
            }
        }
    }

    /// One cursor window. Returns true when the pool is caught up and the
    /// loop should back off.
    async fn process_once(&self) -> Result<bool> {
        let mut state = self
            .db
            .get_sync_state(self.pool.name)
            .await?
            .with_context(|| format!("no sync state for pool {}", self.pool.name))?;

        let messages = self.fetch_window(state.last_utime).await?;

        if messages.is_empty() {
            // Jump over an empty stretch once the whole window is in the
            // past; the cursor is explicitly advanced before saving.
            if now_unix() > state.last_utime + UTIME_ADDENDUM {
                state.last_utime += UTIME_ADDENDUM;
                self.db.set_sync_state(&state).await?;
            }
            return Ok(true);
        }

        info!("{} tailer got {} new messages", self.pool.name, messages.len());

        let max_utime = messages.iter().map(|m| m.created_at).max().unwrap_or(0);
        let max_lt = messages.iter().map(|m| m.created_lt).max().unwrap_or(0);

        let logs = self.decode_messages(&messages);
        self.db.insert_logs(&logs).await?;

        let now = now_unix();
        for log in &logs {
            let job = WalletRefresh {
                address: log.user_address.clone(),
                enqueued_at: now,
                pool: PoolRef {
                    name: self.pool.name.to_string(),
                    address: self.pool.master.to_friendly(),
                },
                tx_utime: log.utime,
            };
            // presence-based dedup: a live entry for the key wins
            self.queue.enqueue(job).await;
        }

        state.last_utime = advance_cursor(state.last_utime, max_utime);
        state.last_lt = state.last_lt.max(max_lt);
        self.db.set_sync_state(&state).await?;

        Ok(false)
    }

    /// Page through one fetch window, halving it while the first page keeps
    /// failing, until a page comes back empty.
    async fn fetch_window(&self, window_start: i64) -> Result<Vec<OutMessage>> {
        let mut window_end = window_start + UTIME_ADDENDUM;
        let mut page = 0usize;
        let mut failures = 0u32;
        let mut collected = Vec::new();

        loop {
            if failures == MAX_PAGE_FAILURES {
                bail!(
                    "{}: {MAX_PAGE_FAILURES} consecutive page failures at page {page}",
                    self.pool.name
                );
            }

            let batch = match self
                .client
                .fetch_messages(&self.pool.master, window_start, window_end, page, self.page_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    if page == 0 && window_end - window_start > 1 {
                        window_end -= (window_end - window_start) / 2;
                        continue;
                    }
                    warn!("{} page {page} fetch failed: {e:#}", self.pool.name);
                    failures += 1;
                    continue;
                }
            };

            failures = 0;
            if batch.is_empty() {
                return Ok(collected);
            }
            page += 1;
            collected.extend(batch);
        }
    }

    fn decode_messages(&self, messages: &[OutMessage]) -> Vec<OnchainLog> {
        let mut logs = Vec::with_capacity(messages.len());
        for message in messages {
            let hash = tx_hash_hex(&message.tx_hash);
            let version = self.pool.log_version(message.created_lt);

            match parse_log_message(&message.body, version) {
                Ok(event) => {
                    logs.push(OnchainLog::from_event(&event, self.pool.name, hash));
                }
                Err(ParseLogError::UnknownOp { .. }) => {
                    // non-indexed master message, skip silently
                }
                Err(e @ ParseLogError::Malformed { .. }) => {
                    warn!("cannot parse log message hash {hash}: {e}");
                }
            }
        }
        logs
    }
}

/// New cursor position after a batch: capped a window ahead, never behind
/// the current position.
fn advance_cursor(last_utime: i64, max_observed_utime: i64) -> i64 {
    max_observed_utime
        .min(last_utime + UTIME_ADDENDUM)
        .max(last_utime)
}

/// Sleep that returns early (true) on cancellation.
pub(crate) async fn sleep_or_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
