use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode bytes as a lowercase hex string.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Transaction hashes arrive base64-encoded and are stored as lowercase hex.
/// A hash that fails to decode is kept verbatim rather than dropped.
pub fn tx_hash_hex(base64_hash: &str) -> String {
    match STANDARD.decode(base64_hash) {
        Ok(bytes) => hex_encode(&bytes),
        Err(_) => base64_hash.to_string(),
    }
}

/// Current unix time in seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_hash_converts_to_lowercase_hex() {
        assert_eq!(
            tx_hash_hex("AdhzLJzUq/TfP30M1JJhclw42RN2c3ceW+e0HVeT6b0="),
            "01d8732c9cd4abf4df3f7d0cd49261725c38d9137673771e5be7b41d5793e9bd"
        );
    }

    #[test]
    fn undecodable_hash_is_kept_verbatim() {
        assert_eq!(tx_hash_hex("!!not-base64!!"), "!!not-base64!!");
    }
}
