mod cursor;
mod log;
mod user;

pub use cursor::SyncState;
pub use log::OnchainLog;
pub use user::{OnchainUser, UserContractRef};
