use chrono::{DateTime, Utc};
use log::error;
use tokio_postgres::types::ToSql;

use crate::db::models::{OnchainLog, OnchainUser, SyncState, UserContractRef};
use crate::db::postgres::PostgresClient;
use crate::worker::parser::AssetRecord;

/// Insert chunk size for decoded logs.
const LOG_BATCH_SIZE: usize = 1000;

const LOG_COLS: usize = 23;

const LOG_COLUMN_LIST: &str = "\
    hash, pool, utime, tx_type, tx_sub_type, sender_address, user_address, subaccount_id, \
    attached_asset_address, attached_asset_amount, attached_asset_principal, \
    attached_asset_total_supply_principal, attached_asset_total_borrow_principal, \
    attached_asset_s_rate, attached_asset_b_rate, \
    redeemed_asset_address, redeemed_asset_amount, redeemed_asset_principal, \
    redeemed_asset_total_supply_principal, redeemed_asset_total_borrow_principal, \
    redeemed_asset_s_rate, redeemed_asset_b_rate, created_at";

// Big integers travel as decimal strings and are cast to NUMERIC in SQL.
const LOG_COLUMN_CASTS: [&str; LOG_COLS] = [
    "", "", "", "", "", "", "", "",
    "::numeric", "::numeric", "::numeric", "::numeric", "::numeric", "::numeric", "::numeric",
    "::numeric", "::numeric", "::numeric", "::numeric", "::numeric", "::numeric", "::numeric",
    "",
];

/// Owned per-row parameter buffer; values must outlive the borrowed
/// parameter slice handed to tokio-postgres.
struct LogRowParams {
    hash: String,
    pool: String,
    utime: i64,
    tx_type: String,
    tx_sub_type: Option<String>,
    sender_address: String,
    user_address: String,
    subaccount_id: i16,
    attached: [Option<String>; 7],
    redeemed: [Option<String>; 7],
    created_at: DateTime<Utc>,
}

fn asset_strings(record: Option<&AssetRecord>) -> [Option<String>; 7] {
    match record {
        None => Default::default(),
        Some(r) => [
            Some(r.asset_id.to_string()),
            Some(r.amount.to_string()),
            Some(r.principal.to_string()),
            Some(r.total_supply_principal.to_string()),
            Some(r.total_borrow_principal.to_string()),
            Some(r.s_rate.to_string()),
            Some(r.b_rate.to_string()),
        ],
    }
}

impl PostgresClient {
    // ==================== SYNC CURSORS ====================

    pub async fn get_sync_state(&self, pool: &str) -> anyhow::Result<Option<SyncState>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT pool, last_lt, last_utime FROM indexer_sync_state WHERE pool = $1",
                &[&pool],
            )
            .await?;
        Ok(row.map(|row| SyncState {
            pool: row.get("pool"),
            last_lt: row.get("last_lt"),
            last_utime: row.get("last_utime"),
        }))
    }

    pub async fn set_sync_state(&self, state: &SyncState) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO indexer_sync_state (pool, last_lt, last_utime)
                VALUES ($1, $2, $3)
                ON CONFLICT (pool) DO UPDATE SET
                    last_lt = EXCLUDED.last_lt,
                    last_utime = EXCLUDED.last_utime
                "#,
                &[&state.pool, &state.last_lt, &state.last_utime],
            )
            .await
            .map_err(|e| {
                error!("failed to persist sync state for pool {}: {e:?}", state.pool);
                e
            })?;
        Ok(())
    }

    /// Insert the static initial cursor for a pool unless one already exists.
    pub async fn seed_sync_state(&self, pool: &str, initial_utime: i64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let inserted = client
            .execute(
                r#"
                INSERT INTO indexer_sync_state (pool, last_lt, last_utime)
                VALUES ($1, 0, $2)
                ON CONFLICT (pool) DO NOTHING
                "#,
                &[&pool, &initial_utime],
            )
            .await?;
        if inserted > 0 {
            log::info!("Seeded initial sync state for pool {pool} at utime {initial_utime}");
        }
        Ok(())
    }

    // ==================== LOGS ====================

    /// Batch-insert decoded logs, silently ignoring `(hash, pool)`
    /// duplicates.
    pub async fn insert_logs(&self, logs: &[OnchainLog]) -> anyhow::Result<()> {
        if logs.is_empty() {
            return Ok(());
        }
        let client = self.pool.get().await?;

        for chunk in logs.chunks(LOG_BATCH_SIZE) {
            let values_clauses: Vec<String> = chunk
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    let start = i * LOG_COLS + 1;
                    let placeholders: Vec<String> = LOG_COLUMN_CASTS
                        .iter()
                        .enumerate()
                        .map(|(j, cast)| format!("${}{}", start + j, cast))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();

            let query = format!(
                "INSERT INTO onchain_logs ({LOG_COLUMN_LIST}) VALUES {} \
                 ON CONFLICT (hash, pool) DO NOTHING",
                values_clauses.join(", ")
            );

            let rows: Vec<LogRowParams> = chunk
                .iter()
                .map(|l| LogRowParams {
                    hash: l.hash.clone(),
                    pool: l.pool.clone(),
                    utime: l.utime,
                    tx_type: l.tx_type.clone(),
                    tx_sub_type: l.tx_sub_type.clone(),
                    sender_address: l.sender_address.clone(),
                    user_address: l.user_address.clone(),
                    subaccount_id: l.subaccount_id,
                    attached: asset_strings(l.attached.as_ref()),
                    redeemed: asset_strings(l.redeemed.as_ref()),
                    created_at: l.created_at,
                })
                .collect();

            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * LOG_COLS);
            for row in &rows {
                params.push(&row.hash);
                params.push(&row.pool);
                params.push(&row.utime);
                params.push(&row.tx_type);
                params.push(&row.tx_sub_type);
                params.push(&row.sender_address);
                params.push(&row.user_address);
                params.push(&row.subaccount_id);
                for v in &row.attached {
                    params.push(v);
                }
                for v in &row.redeemed {
                    params.push(v);
                }
                params.push(&row.created_at);
            }

            client.execute(query.as_str(), &params).await.map_err(|e| {
                error!("failed to batch insert {} logs: {e:?}", chunk.len());
                e
            })?;
        }

        Ok(())
    }

    // ==================== USERS ====================

    /// Insert or refresh a wallet snapshot; `created_at` survives updates.
    pub async fn upsert_user(&self, user: &OnchainUser) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let state = user.state.to_string();
        let principals = user.principals_json();
        client
            .execute(
                r#"
                INSERT INTO onchain_users (
                    wallet_address, pool, contract_address, code_version,
                    state, principals, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5::numeric, $6, $7, $8)
                ON CONFLICT (wallet_address, pool, contract_address) DO UPDATE SET
                    code_version = EXCLUDED.code_version,
                    state = EXCLUDED.state,
                    principals = EXCLUDED.principals,
                    updated_at = EXCLUDED.updated_at
                "#,
                &[
                    &user.wallet_address,
                    &user.pool,
                    &user.contract_address,
                    &user.code_version,
                    &state,
                    &principals,
                    &user.created_at,
                    &user.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                error!("failed to upsert user {}: {e:?}", user.wallet_address);
                e
            })?;
        Ok(())
    }

    /// Enumerate every known wallet contract, for the periodic reindexer.
    pub async fn get_user_contracts(&self) -> anyhow::Result<Vec<UserContractRef>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT wallet_address, pool, contract_address FROM onchain_users",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| UserContractRef {
                wallet_address: row.get("wallet_address"),
                pool: row.get("pool"),
                contract_address: row.get("contract_address"),
            })
            .collect())
    }

    // ==================== MAINTENANCE ====================

    /// Force-resync support: drop all indexer state.
    pub async fn truncate_indexer_tables(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "TRUNCATE TABLE onchain_logs, onchain_users, indexer_sync_state",
                &[],
            )
            .await?;
        Ok(())
    }
}
