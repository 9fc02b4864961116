//! Static pool registry.
//!
//! The set of lending pools is closed: four pools, each with a fixed master
//! contract, a fixed asset catalogue, the logical-time threshold at which its
//! log schema switched to version 1, and the code hash of its user contract
//! (needed to derive user contract addresses).

use std::sync::Arc;

use num_bigint::BigUint;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use crate::boc::{Cell, CellBuilder, TonAddress};
use crate::worker::parser::LogVersion;

// Asset ids are the 256-bit keys of the protocol's on-chain asset registry,
// written as decimal strings the same way they appear in principal tables.
pub const TON_ASSET_ID: &str =
    "11876925370864614464799087627157805050745321306404563164673853337929163193738";
pub const USDT_ASSET_ID: &str =
    "91621667903763073563570557639433445791506232618002614896981036659302854767224";
pub const JUSDT_ASSET_ID: &str =
    "81203563022592193867903899252711112850180680126331353892172221352147647262515";
pub const JUSDC_ASSET_ID: &str =
    "59636546167967198470134647008558085436004969028957957410318094280110082891718";
pub const STTON_ASSET_ID: &str =
    "33171510858320790266247832496974106978700190498800858393089426423762035476944";
pub const TSTON_ASSET_ID: &str =
    "23103091784861387372100043848078515239542568751939923972799733728526040769767";
pub const TONUSDT_DEDUST_ASSET_ID: &str =
    "101385043286520300676049067359330438448373069137841871026562097979079540439904";
pub const TON_STORM_ASSET_ID: &str =
    "70772196878564564641575179045584595299167675028240038598329982312182743941170";
pub const USDT_STORM_ASSET_ID: &str =
    "48839312865341050576546877995196761556581975995859696798601599030872576409489";
pub const NOT_ASSET_ID: &str =
    "63272935429475047547160566950018214503995518672462153218942708627846845749085";
pub const DOGS_ASSET_ID: &str =
    "50918788872632134518291723145978712110022476979988675880017580610805163693009";
pub const CATI_ASSET_ID: &str =
    "101563884026323503647891287974015286987607783840172791059852695820980647056177";
pub const USDE_ASSET_ID: &str =
    "98281638255104512379049519410242269170317135545117667048087651483812279009354";
pub const TSUSDE_ASSET_ID: &str =
    "33604868692898791249369426189145713090064546741393719833658701125733712580919";

struct PoolDef {
    name: &'static str,
    master: &'static str,
    /// Messages with `lt` below the threshold use log schema version 0.
    v1_lt_threshold: Option<i64>,
    /// Utime the pool went live; seeds the sync cursor on first start.
    initial_utime: i64,
    user_code_hash: &'static str,
    user_code_depth: u16,
    assets: &'static [&'static str],
}

const POOL_DEFS: &[PoolDef] = &[
    PoolDef {
        name: "main",
        master: "EQC8rUZqR_pWV1BylWUlPNBzyiTYVoBEmQkMIQDZXICfnuRr",
        v1_lt_threshold: Some(49_828_980_000_001),
        initial_utime: 1_714_879_105,
        user_code_hash: "b4e04b0f68365b169a8cecf9197318c512fd7de744fef482be507e3b7b1323c0",
        user_code_depth: 3,
        assets: &[
            TON_ASSET_ID,
            USDT_ASSET_ID,
            JUSDT_ASSET_ID,
            JUSDC_ASSET_ID,
            STTON_ASSET_ID,
            TSTON_ASSET_ID,
        ],
    },
    PoolDef {
        name: "lp",
        master: "EQBIlZX2URWkXCSg3QF2MJZU-wC5XkBoLww-hdWk2G37Jc6N",
        v1_lt_threshold: Some(49_712_577_000_001),
        initial_utime: 1_725_205_342,
        user_code_hash: "5dca1977c2dad52bff2971e769760c2b27cefc1880944126fd9320f32ec4a1aa",
        user_code_depth: 3,
        assets: &[
            TON_ASSET_ID,
            USDT_ASSET_ID,
            TONUSDT_DEDUST_ASSET_ID,
            TON_STORM_ASSET_ID,
            USDT_STORM_ASSET_ID,
        ],
    },
    PoolDef {
        name: "alts",
        master: "EQANURVS3fhBO9bivig34iyJQi97FhMbpivo1aUEAS2GYSu-",
        v1_lt_threshold: None,
        initial_utime: 1_732_117_342,
        user_code_hash: "f88efca7f630c1e232439a4060b8e7d3b54a071c613fc1711c5fe9ffe5a83c29",
        user_code_depth: 3,
        assets: &[TON_ASSET_ID, USDT_ASSET_ID, NOT_ASSET_ID, DOGS_ASSET_ID, CATI_ASSET_ID],
    },
    PoolDef {
        name: "stable",
        master: "EQCdIdXf1kA_2Hd9mbGzSFDEPA-Px-et8qTWHEXgRGo0K3zd",
        v1_lt_threshold: None,
        initial_utime: 1_740_441_600,
        user_code_hash: "d72cfb2a5d4bfcbfcf6b68476c3313744174ebe5feaea235f2f57add05815027",
        user_code_depth: 3,
        assets: &[USDT_ASSET_ID, USDE_ASSET_ID, TSUSDE_ASSET_ID],
    },
];

/// Resolved configuration of one pool.
pub struct PoolSpec {
    pub name: &'static str,
    pub master: TonAddress,
    pub initial_utime: i64,
    v1_lt_threshold: Option<i64>,
    user_code_hash: [u8; 32],
    user_code_depth: u16,
    assets: Vec<BigUint>,
}

impl PoolSpec {
    /// Log schema version for a message with the given logical time.
    pub fn log_version(&self, lt: i64) -> LogVersion {
        match self.v1_lt_threshold {
            Some(threshold) if lt < threshold => LogVersion::V0,
            _ => LogVersion::V1,
        }
    }

    /// Asset catalogue; every wallet snapshot carries a principal entry for
    /// each of these.
    pub fn assets(&self) -> &[BigUint] {
        &self.assets
    }

    /// Derive the wallet's user contract address: the hash of the standard
    /// state-init cell built from the pool's user contract code and a fresh
    /// data cell committing to (master, wallet).
    pub fn user_contract_address(&self, wallet: &TonAddress) -> TonAddress {
        let mut data = CellBuilder::new();
        data.store_address(Some(&self.master)).expect("fits in a fresh cell");
        data.store_address(Some(wallet)).expect("fits in a fresh cell");
        let data = data.build();

        let hash = state_init_hash(&self.user_code_hash, self.user_code_depth, &data);
        TonAddress::new(0, hash)
    }
}

/// Representation hash of `state_init` with code given by hash and depth
/// only: maybe-bits `00110` (no split depth, not special, code and data
/// present, no library), two references.
fn state_init_hash(code_hash: &[u8; 32], code_depth: u16, data: &Arc<Cell>) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update([2u8, 1u8]); // d1: two refs, d2: five data bits
    h.update([0b0011_0100u8]); // 00110 + completion tag
    h.update(code_depth.to_be_bytes());
    h.update(data.depth().to_be_bytes());
    h.update(code_hash);
    h.update(data.repr_hash());
    h.finalize().into()
}

static POOLS: Lazy<Vec<PoolSpec>> = Lazy::new(|| {
    POOL_DEFS
        .iter()
        .map(|def| PoolSpec {
            name: def.name,
            master: TonAddress::parse(def.master).expect("static master address"),
            initial_utime: def.initial_utime,
            v1_lt_threshold: def.v1_lt_threshold,
            user_code_hash: parse_hash(def.user_code_hash),
            user_code_depth: def.user_code_depth,
            assets: def
                .assets
                .iter()
                .map(|a| a.parse().expect("static asset id"))
                .collect(),
        })
        .collect()
});

fn parse_hash(s: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).expect("static hex hash");
    }
    out
}

pub fn all() -> &'static [PoolSpec] {
    &POOLS
}

pub fn get(name: &str) -> Option<&'static PoolSpec> {
    POOLS.iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_the_closed_four_pool_set() {
        let names: Vec<&str> = all().iter().map(|p| p.name).collect();
        assert_eq!(names, ["main", "lp", "alts", "stable"]);
        assert!(get("main").is_some());
        assert!(get("testnet").is_none());
    }

    #[test]
    fn log_version_switches_at_the_lt_threshold() {
        let main = get("main").unwrap();
        assert_eq!(main.log_version(49_828_980_000_000), LogVersion::V0);
        assert_eq!(main.log_version(49_828_980_000_001), LogVersion::V1);

        let lp = get("lp").unwrap();
        assert_eq!(lp.log_version(49_712_577_000_000), LogVersion::V0);
        assert_eq!(lp.log_version(49_712_577_000_001), LogVersion::V1);

        // pools launched on the new schema are always version 1
        let alts = get("alts").unwrap();
        assert_eq!(alts.log_version(0), LogVersion::V1);
    }

    #[test]
    fn user_contract_address_is_deterministic_and_pool_specific() {
        let wallet = TonAddress::parse("EQB4r5m9TNskAyvvirSYQt9j3F7DkfOfPTgrW0lXgzIBtKUD").unwrap();
        let main = get("main").unwrap();
        let lp = get("lp").unwrap();

        let a = main.user_contract_address(&wallet);
        let b = main.user_contract_address(&wallet);
        assert_eq!(a, b);
        assert_ne!(a, lp.user_contract_address(&wallet));
        assert_ne!(a, wallet);
    }
}
