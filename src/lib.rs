pub mod boc;
pub mod client;
pub mod config;
pub mod cron;
pub mod db;
pub mod pools;
pub mod queue;
pub mod utils;
pub mod worker;

pub use client::{TokenBucketLimiter, TonCenterClient};
pub use cron::{CronScheduler, CronSettings};
pub use db::PostgresClient;
pub use self::config::Settings;
pub use worker::{PoolTailer, WalletResolver};
