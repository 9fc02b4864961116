use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use num_bigint::BigInt;

/// Materialised wallet position in `onchain_users`.
///
/// `principals` maps decimal asset-id strings to decimal principal strings
/// and always covers the pool's full asset catalogue; `created_at` is set on
/// first insert and preserved by every later upsert.
#[derive(Debug, Clone)]
pub struct OnchainUser {
    pub wallet_address: String,
    pub pool: String,
    pub contract_address: String,
    pub code_version: i64,
    pub state: BigInt,
    pub principals: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OnchainUser {
    pub fn principals_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.principals
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}

/// Enumeration row used by the periodic reindexer.
#[derive(Debug, Clone)]
pub struct UserContractRef {
    pub wallet_address: String,
    pub pool: String,
    pub contract_address: String,
}
