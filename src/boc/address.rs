use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::CellError;

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;

/// A standard TON account address: workchain plus a 256-bit account id.
///
/// Parses both the raw form (`0:<hex>`) and the user-friendly form (36 bytes
/// base64url: tag, workchain, hash, crc16). Displays as user-friendly
/// bounceable, which is the canonical storage form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TonAddress {
    pub workchain: i8,
    pub hash: [u8; 32],
}

impl TonAddress {
    pub fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    pub fn parse(s: &str) -> Result<Self, CellError> {
        if let Some((wc, hash)) = s.split_once(':') {
            let workchain: i8 = wc
                .parse()
                .map_err(|_| CellError::InvalidAddress(format!("workchain in {s:?}")))?;
            let bytes = decode_hex(hash)
                .ok_or_else(|| CellError::InvalidAddress(format!("account id in {s:?}")))?;
            let hash: [u8; 32] = bytes
                .try_into()
                .map_err(|_| CellError::InvalidAddress(format!("account id length in {s:?}")))?;
            return Ok(Self::new(workchain, hash));
        }

        let decoded = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| CellError::InvalidAddress(format!("{s:?}: {e}")))?;
        if decoded.len() != 36 {
            return Err(CellError::InvalidAddress(format!(
                "{s:?}: expected 36 bytes, got {}",
                decoded.len()
            )));
        }
        let tag = decoded[0];
        if tag != TAG_BOUNCEABLE && tag != TAG_NON_BOUNCEABLE {
            return Err(CellError::InvalidAddress(format!("{s:?}: tag {tag:#04x}")));
        }
        let expected = crc16_xmodem(&decoded[..34]);
        let actual = u16::from_be_bytes([decoded[34], decoded[35]]);
        if expected != actual {
            return Err(CellError::InvalidAddress(format!("{s:?}: checksum mismatch")));
        }
        let workchain = decoded[1] as i8;
        let hash: [u8; 32] = decoded[2..34].try_into().expect("34-byte slice");
        Ok(Self::new(workchain, hash))
    }

    /// User-friendly bounceable form (`EQ…` for workchain 0).
    pub fn to_friendly(&self) -> String {
        let mut payload = [0u8; 36];
        payload[0] = TAG_BOUNCEABLE;
        payload[1] = self.workchain as u8;
        payload[2..34].copy_from_slice(&self.hash);
        let crc = crc16_xmodem(&payload[..34]);
        payload[34..36].copy_from_slice(&crc.to_be_bytes());
        URL_SAFE_NO_PAD.encode(payload)
    }

    /// Raw form, `<workchain>:<hex account id>`.
    pub fn to_raw(&self) -> String {
        let mut s = format!("{}:", self.workchain);
        for b in self.hash {
            s.push_str(&format!("{b:02X}"));
        }
        s
    }
}

impl fmt::Display for TonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_friendly())
    }
}

impl fmt::Debug for TonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_friendly())
    }
}

impl TryFrom<String> for TonAddress {
    type Error = CellError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TonAddress> for String {
    fn from(a: TonAddress) -> Self {
        a.to_friendly()
    }
}

impl std::str::FromStr for TonAddress {
    type Err = CellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// CRC-16/XMODEM over the 34-byte tag+workchain+hash payload.
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut reg: u16 = 0;
    for byte in data {
        reg ^= (*byte as u16) << 8;
        for _ in 0..8 {
            reg = if reg & 0x8000 != 0 { (reg << 1) ^ 0x1021 } else { reg << 1 };
        }
    }
    reg
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
