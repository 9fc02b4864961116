//! Minimal cell layer for the TON "bag of cells" data model.
//!
//! On-chain data is a tree of cells, each holding up to 1023 data bits and up
//! to four references to child cells. This module carries exactly what the
//! indexer needs:
//!
//! - [`Cell`] / [`CellBuilder`] / [`Slice`] - the cell tree, a writer and a
//!   bit-level reader
//! - [`from_boc`] / [`to_boc`] - the standard serialised form returned by the
//!   chain API
//! - [`dict`] - read/build support for 256-bit-key dictionaries (principal
//!   tables in user contracts)
//! - [`TonAddress`] - raw and user-friendly address forms

mod address;
mod cell;
mod codec;
pub mod dict;

pub use address::TonAddress;
pub use cell::{Cell, CellBuilder, Slice};
pub use codec::{from_boc, from_boc_base64, to_boc, to_boc_base64};

use thiserror::Error;

/// Maximum number of data bits a single cell may hold.
pub const MAX_CELL_BITS: usize = 1023;

/// Maximum number of child references a single cell may hold.
pub const MAX_CELL_REFS: usize = 4;

#[derive(Debug, Error)]
pub enum CellError {
    #[error("slice underflow: requested {requested} bits, {available} available")]
    Underflow { requested: usize, available: usize },

    #[error("slice has no more references")]
    RefUnderflow,

    #[error("cell overflow: {0} bits exceed the {MAX_CELL_BITS}-bit limit")]
    Overflow(usize),

    #[error("cell reference overflow: more than {MAX_CELL_REFS} references")]
    RefOverflow,

    #[error("invalid bag of cells: {0}")]
    InvalidBoc(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid dictionary: {0}")]
    InvalidDict(String),
}
