use chrono::{DateTime, TimeZone, Utc};

use crate::worker::parser::{AssetRecord, LogEvent};

/// One decoded log message as stored in `onchain_logs`.
///
/// Rows are append-only and identified by `(hash, pool)`; re-ingesting the
/// same transaction is a no-op at the storage layer.
#[derive(Debug, Clone)]
pub struct OnchainLog {
    pub hash: String,
    pub pool: String,
    pub utime: i64,
    pub tx_type: String,
    pub tx_sub_type: Option<String>,
    pub sender_address: String,
    pub user_address: String,
    pub subaccount_id: i16,
    pub attached: Option<AssetRecord>,
    pub redeemed: Option<AssetRecord>,
    pub created_at: DateTime<Utc>,
}

impl OnchainLog {
    /// Stamp a decoded event with its pool and transaction hash (lowercase
    /// hex of the raw 32 bytes).
    pub fn from_event(event: &LogEvent, pool: &str, hash: String) -> Self {
        let header = event.header();
        Self {
            hash,
            pool: pool.to_string(),
            utime: header.utime,
            tx_type: event.tx_type().as_str().to_string(),
            tx_sub_type: event.tx_sub_type().map(|s| s.as_str().to_string()),
            sender_address: header.sender_address.to_friendly(),
            user_address: header.user_address.to_friendly(),
            subaccount_id: header.subaccount_id,
            attached: event.attached().cloned(),
            redeemed: event.redeemed().cloned(),
            created_at: Utc
                .timestamp_opt(header.utime, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}
