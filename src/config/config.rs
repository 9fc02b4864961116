use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Indexer,
    Liquidator,
}

/// The only supported relational store.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Postgres,
}

// The config crate lowercases keys read from files, so every camelCase key
// also carries its lowercase alias.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DbSettings {
    #[serde(alias = "dbhost")]
    pub db_host: String,
    #[serde(default = "default_db_port", alias = "dbport")]
    pub db_port: u16,
    #[serde(alias = "dbuser")]
    pub db_user: String,
    #[serde(default, alias = "dbpass")]
    pub db_pass: String,
    #[serde(alias = "dbname")]
    pub db_name: String,
}

fn default_db_port() -> u16 {
    5432
}

/// Root application configuration, loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub mode: Mode,
    #[serde(default = "default_db_type", alias = "dbtype")]
    pub db_type: DbType,
    #[serde(flatten)]
    pub db: DbSettings,
    /// Legacy state endpoint, retained for config compatibility; the TON
    /// Center v3 API is the primary data plane.
    #[serde(default, alias = "graphqlendpoint")]
    pub graphql_endpoint: String,
    #[serde(default = "default_user_sync_workers", alias = "usersyncworkers")]
    pub user_sync_workers: usize,
    /// Truncate all indexer tables and ignore the queue snapshot on start.
    #[serde(default, alias = "forceresynconeverystart")]
    pub force_resync_on_every_start: bool,
    #[serde(default, alias = "migrateonstart")]
    pub migrate_on_start: bool,
    #[serde(default = "default_max_page_size", alias = "maxpagesize")]
    pub max_page_size: usize,
    #[serde(default, alias = "toncenterapikey")]
    pub toncenter_api_key: String,
    #[serde(default = "default_toncenter_rps", rename = "toncenterRPS", alias = "toncenterrps")]
    pub toncenter_rps: f64,
    #[serde(default = "default_toncenter_burst", alias = "toncenterburst")]
    pub toncenter_burst: usize,
}

fn default_db_type() -> DbType {
    DbType::Postgres
}

fn default_user_sync_workers() -> usize {
    4
}

fn default_max_page_size() -> usize {
    256
}

fn default_toncenter_rps() -> f64 {
    9.0
}

fn default_toncenter_burst() -> usize {
    9
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_yaml(yaml: &str) -> Result<Settings, ConfigError> {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn recognised_keys_deserialize() {
        let settings = from_yaml(
            r#"
            mode: indexer
            dbType: postgres
            dbHost: localhost
            dbPort: 5433
            dbUser: indexer
            dbPass: hunter2
            dbName: lendex
            graphqlEndpoint: https://legacy.example/graphql
            userSyncWorkers: 8
            forceResyncOnEveryStart: false
            migrateOnStart: true
            maxPageSize: 500
            toncenterApiKey: secret
            toncenterRPS: 9.5
            toncenterBurst: 20
            "#,
        )
        .unwrap();

        assert_eq!(settings.mode, Mode::Indexer);
        assert_eq!(settings.db_type, DbType::Postgres);
        assert_eq!(settings.db.db_host, "localhost");
        assert_eq!(settings.db.db_port, 5433);
        assert_eq!(settings.db.db_pass, "hunter2");
        assert_eq!(settings.user_sync_workers, 8);
        assert!(settings.migrate_on_start);
        assert_eq!(settings.max_page_size, 500);
        assert_eq!(settings.toncenter_api_key, "secret");
        assert_eq!(settings.toncenter_rps, 9.5);
        assert_eq!(settings.toncenter_burst, 20);
    }

    #[test]
    fn optional_knobs_have_defaults() {
        let settings = from_yaml(
            r#"
            mode: indexer
            dbHost: localhost
            dbUser: indexer
            dbName: lendex
            "#,
        )
        .unwrap();

        assert_eq!(settings.db.db_port, 5432);
        assert!(settings.db.db_pass.is_empty());
        assert!(!settings.force_resync_on_every_start);
        assert!(!settings.migrate_on_start);
        assert_eq!(settings.user_sync_workers, 4);
        assert!(settings.toncenter_rps > 0.0);
        assert!(settings.graphql_endpoint.is_empty());
    }

    #[test]
    fn unknown_db_type_is_a_config_error() {
        let result = from_yaml(
            r#"
            mode: indexer
            dbType: redis
            dbHost: localhost
            dbUser: indexer
            dbName: lendex
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn liquidator_mode_parses_but_is_distinct() {
        let settings = from_yaml(
            r#"
            mode: liquidator
            dbHost: localhost
            dbUser: indexer
            dbName: lendex
            "#,
        )
        .unwrap();
        assert_eq!(settings.mode, Mode::Liquidator);
        assert_ne!(settings.mode, Mode::Indexer);
    }
}
