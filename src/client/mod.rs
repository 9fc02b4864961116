pub mod rate_limit;
pub mod toncenter;

pub use rate_limit::TokenBucketLimiter;
pub use toncenter::{OutMessage, TonCenterClient};
