//! Full wallet reindex sweep.
//!
//! Enumerates every known wallet contract and refreshes its snapshot from
//! the chain, independently of new log activity. This converges wallets
//! whose refresh jobs were dropped (fatal decode, lost snapshot) toward the
//! true on-chain state.

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::client::TonCenterClient;
use crate::db::models::UserContractRef;
use crate::db::PostgresClient;
use crate::pools;
use crate::utils::now_unix;
use crate::worker::resolver::apply_account_state;

/// Account states are fetched in address batches of this size.
pub const REINDEX_BATCH_SIZE: usize = 100;

pub async fn run(
    db: &Arc<PostgresClient>,
    client: &Arc<TonCenterClient>,
    token: &CancellationToken,
) -> Result<()> {
    let contracts = db.get_user_contracts().await?;
    info!("Reindex sweep over {} wallet contracts", contracts.len());

    for pool in pools::all() {
        let mut refs: Vec<&UserContractRef> =
            contracts.iter().filter(|c| c.pool == pool.name).collect();
        if refs.is_empty() {
            continue;
        }
        refs.sort_by(|a, b| a.contract_address.cmp(&b.contract_address));
        refs.dedup_by(|a, b| a.contract_address == b.contract_address);

        let total = refs.len();
        let mut ok = 0usize;
        let mut failed = 0usize;

        for batch in refs.chunks(REINDEX_BATCH_SIZE) {
            if token.is_cancelled() {
                info!("Reindex sweep cancelled");
                return Ok(());
            }

            let addresses: Vec<String> =
                batch.iter().map(|c| c.contract_address.clone()).collect();
            let states = match client.fetch_account_states(&addresses).await {
                Ok(states) => states,
                Err(e) => {
                    // no retry within this sweep; the next one covers it
                    warn!("{}: reindex batch fetch failed: {e:#}", pool.name);
                    failed += batch.len();
                    continue;
                }
            };

            let now = now_unix();
            for contract in batch {
                let boc = states
                    .get(&contract.contract_address)
                    .map(String::as_str)
                    .unwrap_or_default();
                if boc.is_empty() {
                    continue;
                }
                match apply_account_state(
                    db,
                    pool,
                    &contract.wallet_address,
                    &contract.contract_address,
                    boc,
                    now,
                    now,
                )
                .await
                {
                    Ok(()) => ok += 1,
                    Err(e) => {
                        warn!(
                            "{}: reindex of {} failed: {e:#}",
                            pool.name, contract.contract_address
                        );
                        failed += 1;
                    }
                }
            }
        }

        info!("Reindexed pool {}: {ok} ok, {failed} failed, {total} total", pool.name);
    }

    Ok(())
}
