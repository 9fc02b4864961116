mod conversion;

pub use conversion::{hex_encode, now_unix, tx_hash_hex};
