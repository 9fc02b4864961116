/// Per-pool sync progress in `indexer_sync_state`.
///
/// `last_utime` never decreases; it is persisted only after the batch it
/// covers has been inserted, so a crash between the two re-ingests
/// idempotently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub pool: String,
    pub last_lt: i64,
    pub last_utime: i64,
}
