use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use tokio_postgres::NoTls;

use crate::config::DbSettings;

/// PostgreSQL client with connection pooling.
///
/// All indexer persistence goes through this: decoded logs, wallet
/// snapshots and sync cursors. Connection setup retries with exponential
/// backoff; a pool that cannot be reached after that is a startup failure.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    pub async fn new(settings: &DbSettings) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL at {}:{}", settings.db_host, settings.db_port);

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.db_host)
            .port(settings.db_port)
            .user(&settings.db_user)
            .dbname(&settings.db_name);
        if !settings.db_pass.is_empty() {
            pg_config.password(&settings.db_pass);
        }

        let mgr_config = ManagerConfig { recycling_method: RecyclingMethod::Fast };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(16)
            .build()
            .context("failed to create PostgreSQL connection pool")?;

        let max_retries = 3;
        for attempt in 1..=max_retries {
            match pool.get().await {
                Ok(_) => {
                    info!("Connected to PostgreSQL");
                    return Ok(Self { pool });
                }
                Err(e) if attempt < max_retries => {
                    let delay = std::time::Duration::from_millis(100 * 2_u64.pow(attempt));
                    warn!(
                        "PostgreSQL connect attempt {attempt}/{max_retries} failed ({e}), retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "failed to connect to PostgreSQL after {max_retries} attempts: {e}"
                    ));
                }
            }
        }
        unreachable!("retry loop returns");
    }

    /// Apply `schema/postgres.sql` statement by statement.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");
        let client = self.pool.get().await?;

        let schema = tokio::fs::read_to_string("schema/postgres.sql")
            .await
            .context("failed to read schema/postgres.sql")?;

        for stmt in schema.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            client
                .execute(stmt, &[])
                .await
                .with_context(|| format!("failed to execute migration statement: {stmt}"))?;
        }

        info!("PostgreSQL schema applied");
        Ok(())
    }
}
