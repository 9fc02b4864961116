//! Deduplicated wallet-refresh work queue.
//!
//! The queue is a bounded channel paired with a live-set map keyed by
//! `(wallet, pool)`. The tailer inserts-if-absent before pushing, workers
//! overwrite the entry when requeueing a failed job and delete it on
//! success, so at most one live entry exists per key at any moment. When the
//! channel is full the tailer's enqueue blocks, stalling ingestion for that
//! pool only.
//!
//! On shutdown the live set (not the channel) is serialised to
//! `update_queue.json` and restored on the next start.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use log::info;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub const QUEUE_CAPACITY: usize = 30_000;

pub const SNAPSHOT_FILE: &str = "update_queue.json";

/// Pool identity carried inside a job, matching the snapshot file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRef {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address")]
    pub address: String,
}

/// One pending wallet-state refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRefresh {
    #[serde(rename = "Address")]
    pub address: String,
    /// Unix seconds the job was first enqueued.
    #[serde(rename = "CreatedAt")]
    pub enqueued_at: i64,
    #[serde(rename = "Pool")]
    pub pool: PoolRef,
    /// Utime of the transaction that triggered the refresh.
    #[serde(rename = "TxUtime")]
    pub tx_utime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueueKey {
    address: String,
    pool: String,
}

impl QueueKey {
    fn of(job: &WalletRefresh) -> Self {
        Self { address: job.address.clone(), pool: job.pool.name.clone() }
    }
}

/// Producer half plus the shared live set; workers receive jobs from the
/// paired [`mpsc::Receiver`].
pub struct UpdateQueue {
    tx: mpsc::Sender<WalletRefresh>,
    live: Mutex<FxHashMap<QueueKey, WalletRefresh>>,
}

/// Create the queue and the receiver the worker pool drains.
pub fn channel() -> (Arc<UpdateQueue>, mpsc::Receiver<WalletRefresh>) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (
        Arc::new(UpdateQueue { tx, live: Mutex::new(FxHashMap::default()) }),
        rx,
    )
}

impl UpdateQueue {
    /// Insert-if-absent: returns false without touching the channel when a
    /// live entry already exists for the key.
    pub async fn enqueue(&self, job: WalletRefresh) -> bool {
        let key = QueueKey::of(&job);
        {
            let mut live = self.live.lock().expect("queue lock");
            if live.contains_key(&key) {
                return false;
            }
            live.insert(key.clone(), job.clone());
        }
        if self.tx.send(job).await.is_err() {
            // receiver gone: shutting down, drop the orphaned entry
            self.live.lock().expect("queue lock").remove(&key);
            return false;
        }
        true
    }

    /// Put a failed job back, keeping its key live.
    pub async fn requeue(&self, job: WalletRefresh) {
        {
            let mut live = self.live.lock().expect("queue lock");
            live.insert(QueueKey::of(&job), job.clone());
        }
        let _ = self.tx.send(job).await;
    }

    /// Drop the live entry after a successful (or fatally failed) resolution.
    pub fn complete(&self, address: &str, pool: &str) {
        self.live
            .lock()
            .expect("queue lock")
            .remove(&QueueKey { address: address.to_string(), pool: pool.to_string() });
    }

    pub fn live_len(&self) -> usize {
        self.live.lock().expect("queue lock").len()
    }

    /// The live entries, ordered by key so snapshots are deterministic.
    pub fn live_entries(&self) -> Vec<WalletRefresh> {
        let live = self.live.lock().expect("queue lock");
        let mut entries: Vec<WalletRefresh> = live.values().cloned().collect();
        entries.sort_by(|a, b| (&a.address, &a.pool.name).cmp(&(&b.address, &b.pool.name)));
        entries
    }

    /// Atomically write the live set to `path` (write-then-rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let entries = self.live_entries();
        let data = serde_json::to_vec(&entries).context("failed to encode queue snapshot")?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move snapshot into {}", path.display()))?;

        info!("Saved {} queued wallet refreshes to {}", entries.len(), path.display());
        Ok(())
    }

    /// Re-populate the live set and the channel from a snapshot file.
    /// A missing file is an empty queue, not an error.
    pub async fn restore(&self, path: &Path) -> Result<usize> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Queue snapshot {} not found, starting empty", path.display());
                return Ok(0);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        let entries: Vec<WalletRefresh> =
            serde_json::from_slice(&data).context("failed to decode queue snapshot")?;
        let count = entries.len();
        for job in entries {
            {
                let mut live = self.live.lock().expect("queue lock");
                live.insert(QueueKey::of(&job), job.clone());
            }
            let _ = self.tx.send(job).await;
        }

        info!("Restored {count} queued wallet refreshes from {}", path.display());
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(address: &str, pool: &str, tx_utime: i64) -> WalletRefresh {
        WalletRefresh {
            address: address.to_string(),
            enqueued_at: 1_755_293_452,
            pool: PoolRef {
                name: pool.to_string(),
                address: "EQC8rUZqR_pWV1BylWUlPNBzyiTYVoBEmQkMIQDZXICfnuRr".to_string(),
            },
            tx_utime,
        }
    }

    #[tokio::test]
    async fn enqueue_deduplicates_by_wallet_and_pool() {
        let (queue, mut rx) = channel();

        assert!(queue.enqueue(job("EQwallet", "main", 1)).await);
        assert!(!queue.enqueue(job("EQwallet", "main", 2)).await);
        // same wallet in a different pool is a distinct key
        assert!(queue.enqueue(job("EQwallet", "lp", 3)).await);

        assert_eq!(queue.live_len(), 2);
        assert_eq!(rx.recv().await.unwrap().tx_utime, 1);
        assert_eq!(rx.recv().await.unwrap().tx_utime, 3);
    }

    #[tokio::test]
    async fn complete_frees_the_key_for_reenqueue() {
        let (queue, mut rx) = channel();

        assert!(queue.enqueue(job("EQwallet", "main", 1)).await);
        queue.complete("EQwallet", "main");
        assert_eq!(queue.live_len(), 0);
        assert!(queue.enqueue(job("EQwallet", "main", 2)).await);

        assert_eq!(rx.recv().await.unwrap().tx_utime, 1);
        assert_eq!(rx.recv().await.unwrap().tx_utime, 2);
    }

    #[tokio::test]
    async fn requeue_keeps_a_single_live_entry() {
        let (queue, mut rx) = channel();

        assert!(queue.enqueue(job("EQwallet", "main", 1)).await);
        let failed = rx.recv().await.unwrap();
        queue.requeue(failed).await;

        assert_eq!(queue.live_len(), 1);
        // key still live, so the tailer cannot double-enqueue
        assert!(!queue.enqueue(job("EQwallet", "main", 9)).await);
        assert_eq!(rx.recv().await.unwrap().tx_utime, 1);
    }

    #[tokio::test]
    async fn snapshot_round_trip_restores_the_live_set() {
        let dir = std::env::temp_dir().join(format!("queue-snap-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(SNAPSHOT_FILE);

        let (queue, _rx) = channel();
        queue.enqueue(job("EQalice", "main", 10)).await;
        queue.enqueue(job("EQbob", "lp", 20)).await;
        queue.save(&path).unwrap();

        let (restored, mut rx2) = channel();
        assert_eq!(restored.restore(&path).await.unwrap(), 2);
        assert_eq!(restored.live_entries(), queue.live_entries());
        assert!(rx2.recv().await.is_some());
        assert!(rx2.recv().await.is_some());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn snapshot_file_uses_the_established_field_names() {
        let encoded = serde_json::to_value(vec![job("EQalice", "main", 10)]).unwrap();
        let entry = &encoded[0];
        assert_eq!(entry["Address"], "EQalice");
        assert_eq!(entry["CreatedAt"], 1_755_293_452);
        assert_eq!(entry["Pool"]["Name"], "main");
        assert_eq!(entry["TxUtime"], 10);
    }

    #[tokio::test]
    async fn missing_snapshot_file_is_an_empty_queue() {
        let (queue, _rx) = channel();
        let restored = queue
            .restore(Path::new("/nonexistent/update_queue.json"))
            .await
            .unwrap();
        assert_eq!(restored, 0);
    }
}
