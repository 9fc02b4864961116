//! User contract account-state decoding.
//!
//! Each wallet has one user contract per pool; its account data commits to
//! the pool master and the owning wallet and holds the wallet's principal
//! table keyed by asset id. Positive principals are supply positions,
//! negative ones are borrows.

use std::sync::Arc;

use num_bigint::{BigInt, BigUint};

use crate::boc::{dict, Cell, CellError, TonAddress};

/// Decoded user contract state.
#[derive(Debug, Clone)]
pub struct UserAccountState {
    pub code_version: i64,
    pub owner: TonAddress,
    pub user_state: BigInt,
    pub principals: Vec<(BigUint, BigInt)>,
}

/// Parse a user contract data cell.
///
/// Layout: `code_version:uint32 master:MsgAddress owner:MsgAddress
/// user_state:int64 principals:(HashmapE 256 int64)`.
pub fn parse_account_state(root: &Arc<Cell>) -> Result<UserAccountState, CellError> {
    let mut slice = root.parse();

    let code_version = slice.load_uint(32)? as i64;
    // pool master, already known from the job context
    slice.load_address()?;
    let owner = slice
        .load_address()?
        .ok_or_else(|| CellError::InvalidAddress("owner is addr_none".into()))?;
    let user_state = BigInt::from(slice.load_int(64)?);

    let principals = if slice.load_bit()? {
        let table = slice.load_ref()?;
        dict::parse(&table, 256)?
            .into_iter()
            .map(|(asset, mut value)| Ok((asset, BigInt::from(value.load_int(64)?))))
            .collect::<Result<Vec<_>, CellError>>()?
    } else {
        Vec::new()
    };

    Ok(UserAccountState { code_version, owner, user_state, principals })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::boc::CellBuilder;

    /// Build a user contract data cell for tests.
    pub fn build_account_state(
        code_version: u32,
        master: &TonAddress,
        owner: &TonAddress,
        user_state: i64,
        principals: &[(BigUint, i64)],
    ) -> Arc<Cell> {
        let mut b = CellBuilder::new();
        b.store_uint(code_version as u64, 32).unwrap();
        b.store_address(Some(master)).unwrap();
        b.store_address(Some(owner)).unwrap();
        b.store_int(user_state, 64).unwrap();
        match dict::build(principals, 256, |b, v| b.store_int(*v, 64).map(|_| ())).unwrap() {
            Some(table) => {
                b.store_bit(true).unwrap();
                b.store_ref(table).unwrap();
            }
            None => {
                b.store_bit(false).unwrap();
            }
        }
        b.build()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::build_account_state;
    use super::*;
    use crate::pools;

    fn wallet() -> TonAddress {
        TonAddress::parse("EQB4r5m9TNskAyvvirSYQt9j3F7DkfOfPTgrW0lXgzIBtKUD").unwrap()
    }

    #[test]
    fn parses_state_with_principal_table() {
        let main = pools::get("main").unwrap();
        let ton: BigUint = pools::TON_ASSET_ID.parse().unwrap();
        let usdt: BigUint = pools::USDT_ASSET_ID.parse().unwrap();

        let cell = build_account_state(
            5,
            &main.master,
            &wallet(),
            1,
            &[(ton.clone(), -1_032_258_835), (usdt.clone(), 250_000_000)],
        );

        let state = parse_account_state(&cell).unwrap();
        assert_eq!(state.code_version, 5);
        assert_eq!(state.owner, wallet());
        assert_eq!(state.user_state, BigInt::from(1));

        let mut principals = state.principals;
        principals.sort_by(|a, b| a.0.cmp(&b.0));
        let mut expected = vec![
            (ton, BigInt::from(-1_032_258_835)),
            (usdt, BigInt::from(250_000_000)),
        ];
        expected.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(principals, expected);
    }

    #[test]
    fn empty_principal_table_parses_to_no_entries() {
        let main = pools::get("main").unwrap();
        let cell = build_account_state(3, &main.master, &wallet(), 0, &[]);
        let state = parse_account_state(&cell).unwrap();
        assert!(state.principals.is_empty());
    }

    #[test]
    fn truncated_state_is_an_error() {
        let mut b = crate::boc::CellBuilder::new();
        b.store_uint(5, 32).unwrap();
        assert!(parse_account_state(&b.build()).is_err());
    }
}
