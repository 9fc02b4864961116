//! Log message decoder.
//!
//! Pool masters emit one external-out message per settled operation. The body
//! is a cell tree: an op-code byte, the header (user, sender, on version 1 a
//! reserved pool address, utime, optionally a 16-bit subaccount id), then one
//! or two referenced asset fieldsets. Decoding is pure and does no I/O.

use std::sync::Arc;

use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use thiserror::Error;

use crate::boc::{from_boc_base64, Cell, CellError, Slice, TonAddress};

pub const OP_SUPPLY: u8 = 0x01;
pub const OP_WITHDRAW_LEGACY: u8 = 0x02;
pub const OP_LIQUIDATION: u8 = 0x03;
pub const OP_WITHDRAW: u8 = 0x16;

/// Log schema version, selected per pool by the message's logical time.
///
/// Version 1 inserts a reserved pool address between the sender and the
/// utime; the field is loaded and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogVersion {
    V0,
    V1,
}

#[derive(Debug, Error)]
pub enum ParseLogError {
    /// Not one of the known op-codes. The tailer skips these silently.
    #[error("unknown log op-code {op:#04x}")]
    UnknownOp { op: u8 },

    /// Structurally broken message. When the cell parsed but left trailing
    /// bits, the partially populated event is attached for diagnostics; it
    /// must not be inserted.
    #[error("malformed log: {reason}")]
    Malformed {
        reason: String,
        partial: Option<Box<LogEvent>>,
    },
}

impl From<CellError> for ParseLogError {
    fn from(e: CellError) -> Self {
        ParseLogError::Malformed { reason: e.to_string(), partial: None }
    }
}

/// Fields shared by every log variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHeader {
    pub user_address: TonAddress,
    pub sender_address: TonAddress,
    pub utime: i64,
    pub subaccount_id: i16,
}

/// One side of an operation: the seven-field asset record.
///
/// Wire widths are u256/u64/i64 but values are widened so storage and JSON
/// round-trips lose nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub asset_id: BigUint,
    pub amount: BigUint,
    pub principal: BigInt,
    pub total_supply_principal: BigInt,
    pub total_borrow_principal: BigInt,
    pub s_rate: BigUint,
    pub b_rate: BigUint,
}

/// A decoded pool master log message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Supply {
        header: LogHeader,
        attached: AssetRecord,
    },
    Withdraw {
        header: LogHeader,
        /// Populated only by the new (`0x16`) layout; the legacy layout
        /// carries an empty attached reference.
        attached: Option<AssetRecord>,
        redeemed: AssetRecord,
    },
    Liquidation {
        header: LogHeader,
        attached: AssetRecord,
        redeemed: AssetRecord,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    Supply,
    Withdraw,
    Liquidation,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Supply => "supply",
            TxType::Withdraw => "withdraw",
            TxType::Liquidation => "liquidation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxSubType {
    Supply,
    Repay,
    Withdraw,
    Borrow,
}

impl TxSubType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxSubType::Supply => "supply",
            TxSubType::Repay => "repay",
            TxSubType::Withdraw => "withdraw",
            TxSubType::Borrow => "borrow",
        }
    }
}

impl LogEvent {
    pub fn header(&self) -> &LogHeader {
        match self {
            LogEvent::Supply { header, .. }
            | LogEvent::Withdraw { header, .. }
            | LogEvent::Liquidation { header, .. } => header,
        }
    }

    pub fn tx_type(&self) -> TxType {
        match self {
            LogEvent::Supply { .. } => TxType::Supply,
            LogEvent::Withdraw { .. } => TxType::Withdraw,
            LogEvent::Liquidation { .. } => TxType::Liquidation,
        }
    }

    /// Supply splits on the sign of the attached principal, withdraw on the
    /// sign of the redeemed principal; liquidations have no subtype.
    pub fn tx_sub_type(&self) -> Option<TxSubType> {
        match self {
            LogEvent::Supply { attached, .. } => {
                if attached.principal > BigInt::zero() {
                    Some(TxSubType::Supply)
                } else {
                    Some(TxSubType::Repay)
                }
            }
            LogEvent::Withdraw { redeemed, .. } => {
                if redeemed.principal >= BigInt::zero() {
                    Some(TxSubType::Withdraw)
                } else {
                    Some(TxSubType::Borrow)
                }
            }
            LogEvent::Liquidation { .. } => None,
        }
    }

    pub fn attached(&self) -> Option<&AssetRecord> {
        match self {
            LogEvent::Supply { attached, .. } => Some(attached),
            LogEvent::Withdraw { attached, .. } => attached.as_ref(),
            LogEvent::Liquidation { attached, .. } => Some(attached),
        }
    }

    pub fn redeemed(&self) -> Option<&AssetRecord> {
        match self {
            LogEvent::Supply { .. } => None,
            LogEvent::Withdraw { redeemed, .. } | LogEvent::Liquidation { redeemed, .. } => {
                Some(redeemed)
            }
        }
    }
}

/// Decode a base64 log message body into a typed event.
pub fn parse_log_message(body: &str, version: LogVersion) -> Result<LogEvent, ParseLogError> {
    let root = from_boc_base64(body)?;
    let mut slice = root.parse();

    let op = slice.load_uint(8)? as u8;
    let event = match op {
        OP_SUPPLY => {
            let header = parse_header(&mut slice, version)?;
            let attached = parse_asset_record(&slice.load_ref()?)?;
            LogEvent::Supply { header, attached }
        }
        OP_WITHDRAW_LEGACY => {
            let header = parse_header(&mut slice, version)?;
            // attached reference is present but empty in the legacy layout
            slice.load_ref()?;
            let redeemed = parse_asset_record(&slice.load_ref()?)?;
            LogEvent::Withdraw { header, attached: None, redeemed }
        }
        OP_WITHDRAW => {
            let header = parse_header(&mut slice, version)?;
            let attached = parse_asset_record(&slice.load_ref()?)?;
            let redeemed = parse_asset_record(&slice.load_ref()?)?;
            LogEvent::Withdraw { header, attached: Some(attached), redeemed }
        }
        OP_LIQUIDATION => {
            let header = parse_header(&mut slice, version)?;
            let attached = parse_asset_record(&slice.load_ref()?)?;
            let redeemed = parse_asset_record(&slice.load_ref()?)?;
            LogEvent::Liquidation { header, attached, redeemed }
        }
        op => return Err(ParseLogError::UnknownOp { op }),
    };

    let bits_left = slice.bits_left();
    if bits_left > 0 {
        return Err(ParseLogError::Malformed {
            reason: format!("{} bits left after {}", bits_left, event.tx_type().as_str()),
            partial: Some(Box::new(event)),
        });
    }

    Ok(event)
}

fn parse_header(slice: &mut Slice, version: LogVersion) -> Result<LogHeader, ParseLogError> {
    let user_address = load_required_address(slice, "user")?;
    let sender_address = load_required_address(slice, "sender")?;
    if version == LogVersion::V1 {
        // reserved pool address
        slice.load_address()?;
    }
    let utime = slice.load_uint(32)? as i64;

    // The newer schema appends a signed 16-bit subaccount id; its presence is
    // detected by the exact data-bit remainder.
    let subaccount_id = if slice.bits_left() == 16 { slice.load_int(16)? as i16 } else { 0 };

    Ok(LogHeader { user_address, sender_address, utime, subaccount_id })
}

fn load_required_address(slice: &mut Slice, field: &str) -> Result<TonAddress, ParseLogError> {
    slice
        .load_address()?
        .ok_or_else(|| ParseLogError::Malformed {
            reason: format!("{field} address is addr_none"),
            partial: None,
        })
}

fn parse_asset_record(cell: &Arc<Cell>) -> Result<AssetRecord, ParseLogError> {
    let mut s = cell.parse();
    Ok(AssetRecord {
        asset_id: s.load_big_uint(256)?,
        amount: s.load_big_uint(64)?,
        principal: s.load_big_int(64)?,
        total_supply_principal: s.load_big_int(64)?,
        total_borrow_principal: s.load_big_int(64)?,
        s_rate: s.load_big_uint(64)?,
        b_rate: s.load_big_uint(64)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boc::{to_boc_base64, CellBuilder};
    use num_traits::ToPrimitive;

    // Production withdraw log from the main pool master (LT 60505066000009).
    const SAMPLE_WITHDRAW: &str = "te6cckEBAwEAwgAC0wKADxXzN6mbZIBlffFWkwhb7HuL2HI+c+enBWtpKvBmQDaQA/5r9+3BuQtvts58lPXP/CmCf4PLiyMxLQ3z0ECjJDMKADxXzN6mbZIBlffFWkwhb7HuL2HI+c+enBWtpKvBmQDaNE/ThkABAgAAAKAaQhn+XmDWOvKjzH3Ob+xptFxrVxhJemFI58IyrIe9igAAAAAzw0Nt/////8J4+u0ABw6Ts8bmGwAErwWDStL3AAAAvsV60PkAAADD4R/PCeMM2T4=";

    const TON_ASSET_ID: &str =
        "11876925370864614464799087627157805050745321306404563164673853337929163193738";

    fn addr(s: &str) -> TonAddress {
        TonAddress::parse(s).unwrap()
    }

    fn asset_record(principal: i64) -> AssetRecord {
        AssetRecord {
            asset_id: TON_ASSET_ID.parse().unwrap(),
            amount: 868_434_797u64.into(),
            principal: principal.into(),
            total_supply_principal: 1_986_352_376_112_667i64.into(),
            total_borrow_principal: 1_318_338_119_258_871i64.into(),
            s_rate: 819_356_946_681u64.into(),
            b_rate: 841_295_580_937u64.into(),
        }
    }

    fn build_asset_cell(record: &AssetRecord) -> Arc<Cell> {
        let mut b = CellBuilder::new();
        b.store_big_uint(&record.asset_id, 256).unwrap();
        b.store_big_uint(&record.amount, 64).unwrap();
        b.store_int(record.principal.to_i64().unwrap(), 64).unwrap();
        b.store_int(record.total_supply_principal.to_i64().unwrap(), 64).unwrap();
        b.store_int(record.total_borrow_principal.to_i64().unwrap(), 64).unwrap();
        b.store_big_uint(&record.s_rate, 64).unwrap();
        b.store_big_uint(&record.b_rate, 64).unwrap();
        b.build()
    }

    fn build_log(
        op: u8,
        version: LogVersion,
        subaccount: Option<i16>,
        refs: &[Arc<Cell>],
        trailing_bits: usize,
    ) -> String {
        let mut b = CellBuilder::new();
        b.store_uint(op as u64, 8).unwrap();
        let user = addr("EQB4r5m9TNskAyvvirSYQt9j3F7DkfOfPTgrW0lXgzIBtKUD");
        let sender = addr("EQD_mv37cG5C2-2znyU9c_8KYJ_g8uLIzEtDfPQQKMkMwrhI");
        b.store_address(Some(&user)).unwrap();
        b.store_address(Some(&sender)).unwrap();
        if version == LogVersion::V1 {
            b.store_address(Some(&user)).unwrap();
        }
        b.store_uint(1_755_293_452, 32).unwrap();
        if let Some(sub) = subaccount {
            b.store_int(sub as i64, 16).unwrap();
        }
        for _ in 0..trailing_bits {
            b.store_bit(false).unwrap();
        }
        for r in refs {
            b.store_ref(r.clone()).unwrap();
        }
        to_boc_base64(&b.build())
    }

    #[test]
    fn decodes_production_withdraw_log() {
        let event = parse_log_message(SAMPLE_WITHDRAW, LogVersion::V1).unwrap();

        assert_eq!(event.tx_type(), TxType::Withdraw);
        // negative redeemed principal: the wallet borrowed
        assert_eq!(event.tx_sub_type(), Some(TxSubType::Borrow));

        let header = event.header();
        assert_eq!(
            header.user_address,
            addr("EQB4r5m9TNskAyvvirSYQt9j3F7DkfOfPTgrW0lXgzIBtKUD")
        );
        assert_eq!(
            header.sender_address,
            addr("EQD_mv37cG5C2-2znyU9c_8KYJ_g8uLIzEtDfPQQKMkMwrhI")
        );
        assert_eq!(header.utime, 1_755_293_452);
        assert_eq!(header.subaccount_id, 0);

        assert!(event.attached().is_none());
        let redeemed = event.redeemed().unwrap();
        assert_eq!(redeemed.asset_id, TON_ASSET_ID.parse().unwrap());
        assert_eq!(redeemed.amount, 868_434_797u64.into());
        assert_eq!(redeemed.principal, BigInt::from(-1_032_258_835i64));
        assert_eq!(redeemed.total_supply_principal, BigInt::from(1_986_352_376_112_667i64));
        assert_eq!(redeemed.total_borrow_principal, BigInt::from(1_318_338_119_258_871i64));
        assert_eq!(redeemed.s_rate, 819_356_946_681u64.into());
        assert_eq!(redeemed.b_rate, 841_295_580_937u64.into());
    }

    #[test]
    fn supply_subtype_follows_principal_sign() {
        for (principal, expected) in [
            (500, TxSubType::Supply),
            (0, TxSubType::Repay),
            (-500, TxSubType::Repay),
        ] {
            let body = build_log(
                OP_SUPPLY,
                LogVersion::V0,
                None,
                &[build_asset_cell(&asset_record(principal))],
                0,
            );
            let event = parse_log_message(&body, LogVersion::V0).unwrap();
            assert_eq!(event.tx_type(), TxType::Supply);
            assert_eq!(event.tx_sub_type(), Some(expected), "principal {principal}");
        }
    }

    #[test]
    fn withdraw_subtype_follows_redeemed_sign() {
        let empty = CellBuilder::new().build();
        for (principal, expected) in [
            (100, TxSubType::Withdraw),
            (0, TxSubType::Withdraw),
            (-100, TxSubType::Borrow),
        ] {
            let body = build_log(
                OP_WITHDRAW_LEGACY,
                LogVersion::V1,
                None,
                &[empty.clone(), build_asset_cell(&asset_record(principal))],
                0,
            );
            let event = parse_log_message(&body, LogVersion::V1).unwrap();
            assert_eq!(event.tx_sub_type(), Some(expected), "principal {principal}");
        }
    }

    #[test]
    fn new_withdraw_layout_carries_both_sides_and_subaccount() {
        let body = build_log(
            OP_WITHDRAW,
            LogVersion::V1,
            Some(-3),
            &[
                build_asset_cell(&asset_record(10)),
                build_asset_cell(&asset_record(-20)),
            ],
            0,
        );
        let event = parse_log_message(&body, LogVersion::V1).unwrap();
        assert_eq!(event.header().subaccount_id, -3);
        assert_eq!(event.attached().unwrap().principal, BigInt::from(10));
        assert_eq!(event.redeemed().unwrap().principal, BigInt::from(-20));
        assert_eq!(event.tx_sub_type(), Some(TxSubType::Borrow));
    }

    #[test]
    fn liquidation_has_no_subtype() {
        let body = build_log(
            OP_LIQUIDATION,
            LogVersion::V0,
            None,
            &[
                build_asset_cell(&asset_record(1)),
                build_asset_cell(&asset_record(2)),
            ],
            0,
        );
        let event = parse_log_message(&body, LogVersion::V0).unwrap();
        assert_eq!(event.tx_type(), TxType::Liquidation);
        assert_eq!(event.tx_sub_type(), None);
    }

    #[test]
    fn unknown_op_code_is_not_surfaced_as_malformed() {
        let body = build_log(
            0x7f,
            LogVersion::V0,
            None,
            &[build_asset_cell(&asset_record(1))],
            0,
        );
        let err = parse_log_message(&body, LogVersion::V0).unwrap_err();
        assert!(matches!(err, ParseLogError::UnknownOp { op: 0x7f }));
    }

    #[test]
    fn truncated_asset_record_is_malformed() {
        let mut short = CellBuilder::new();
        short.store_uint(0, 64).unwrap(); // far fewer than the 640 field bits
        let body = build_log(OP_SUPPLY, LogVersion::V0, None, &[short.build()], 0);
        let err = parse_log_message(&body, LogVersion::V0).unwrap_err();
        assert!(matches!(err, ParseLogError::Malformed { partial: None, .. }));
    }

    #[test]
    fn trailing_bits_yield_partial_event() {
        let body = build_log(
            OP_SUPPLY,
            LogVersion::V0,
            None,
            &[build_asset_cell(&asset_record(9))],
            5,
        );
        let err = parse_log_message(&body, LogVersion::V0).unwrap_err();
        match err {
            ParseLogError::Malformed { partial: Some(event), .. } => {
                assert_eq!(event.tx_type(), TxType::Supply);
                assert_eq!(event.attached().unwrap().principal, BigInt::from(9));
            }
            other => panic!("expected partial malformed event, got {other:?}"),
        }
    }

    #[test]
    fn version_mismatch_is_malformed_not_a_panic() {
        // a version-1 body parsed as version 0 leaves the reserved address
        // dangling; a version-0 body parsed as version 1 runs out of bits
        assert!(matches!(
            parse_log_message(SAMPLE_WITHDRAW, LogVersion::V0),
            Err(ParseLogError::Malformed { .. })
        ));
        let v0_body = build_log(
            OP_SUPPLY,
            LogVersion::V0,
            None,
            &[build_asset_cell(&asset_record(1))],
            0,
        );
        assert!(parse_log_message(&v0_body, LogVersion::V1).is_err());
    }
}
