mod config;

pub use self::config::{DbSettings, DbType, Mode, Settings};
