pub mod parser;
pub mod resolver;
pub mod tailer;
pub mod user_sc;

pub use parser::{parse_log_message, LogEvent, LogVersion, ParseLogError};
pub use resolver::WalletResolver;
pub use tailer::PoolTailer;
