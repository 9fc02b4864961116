use std::fmt;
use std::sync::Arc;

use num_bigint::{BigInt, BigUint, Sign};
use sha2::{Digest, Sha256};

use super::{CellError, TonAddress, MAX_CELL_BITS, MAX_CELL_REFS};

/// An immutable cell: a bit string plus up to four child references.
///
/// Cells are shared via `Arc` so a parsed tree can be walked without copies.
/// Compare cells by `repr_hash`; the raw data vector may differ in padding
/// for equal content.
#[derive(Clone)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl Cell {
    pub(crate) fn new(data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Cell>>) -> Self {
        Self { data, bit_len, refs }
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    /// Raw data bytes; the final byte may contain padding bits past `bit_len`.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bit(&self, index: usize) -> bool {
        (self.data[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Start reading from the beginning of this cell.
    pub fn parse(self: &Arc<Cell>) -> Slice {
        Slice::new(self.clone())
    }

    /// Depth of the subtree rooted at this cell.
    pub fn depth(&self) -> u16 {
        self.refs
            .iter()
            .map(|r| r.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Data bytes with the completion tag applied when `bit_len` is not a
    /// whole number of bytes: one marker bit followed by zeros.
    pub(crate) fn padded_data(&self) -> Vec<u8> {
        let mut out = self.data[..self.bit_len.div_ceil(8)].to_vec();
        if self.bit_len % 8 != 0 {
            let last = out.len() - 1;
            let used = self.bit_len % 8;
            let mask = !(0xffu8 >> used);
            out[last] = (out[last] & mask) | (0x80 >> used);
        }
        out
    }

    pub(crate) fn descriptor_bytes(&self) -> [u8; 2] {
        let d1 = self.refs.len() as u8;
        let d2 = (self.bit_len / 8 + self.bit_len.div_ceil(8)) as u8;
        [d1, d2]
    }

    /// Standard representation hash: sha256 over descriptors, padded data,
    /// child depths and child hashes.
    pub fn repr_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.descriptor_bytes());
        hasher.update(self.padded_data());
        for r in &self.refs {
            hasher.update(r.depth().to_be_bytes());
        }
        for r in &self.refs {
            hasher.update(r.repr_hash());
        }
        hasher.finalize().into()
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell({} bits, {} refs,", self.bit_len, self.refs.len())?;
        for b in self.padded_data() {
            write!(f, " {b:02x}")?;
        }
        write!(f, ")")
    }
}

/// Writer producing a [`Cell`] bit by bit.
#[derive(Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self, CellError> {
        if self.bit_len >= MAX_CELL_BITS {
            return Err(CellError::Overflow(self.bit_len + 1));
        }
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let last = self.data.len() - 1;
            self.data[last] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(self)
    }

    /// Store the low `bits` bits of `value`, most significant first.
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self, CellError> {
        debug_assert!(bits <= 64);
        for i in (0..bits).rev() {
            self.store_bit((value >> i) & 1 == 1)?;
        }
        Ok(self)
    }

    /// Store `value` in two's complement over `bits` bits.
    pub fn store_int(&mut self, value: i64, bits: usize) -> Result<&mut Self, CellError> {
        self.store_uint(value as u64, bits)
    }

    pub fn store_big_uint(&mut self, value: &BigUint, bits: usize) -> Result<&mut Self, CellError> {
        if value.bits() as usize > bits {
            return Err(CellError::Overflow(value.bits() as usize));
        }
        let bytes = value.to_bytes_be();
        let value_bits = bytes.len() * 8;
        // leading zeros down to the requested width
        for _ in 0..bits.saturating_sub(value_bits) {
            self.store_bit(false)?;
        }
        let skip = value_bits.saturating_sub(bits);
        for i in skip..value_bits {
            self.store_bit((bytes[i / 8] >> (7 - i % 8)) & 1 == 1)?;
        }
        Ok(self)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CellError> {
        for b in bytes {
            self.store_uint(*b as u64, 8)?;
        }
        Ok(self)
    }

    /// Store a standard internal address (`addr_std`, no anycast), or the
    /// two-bit `addr_none` tag for `None`.
    pub fn store_address(&mut self, addr: Option<&TonAddress>) -> Result<&mut Self, CellError> {
        match addr {
            None => {
                self.store_uint(0b00, 2)?;
            }
            Some(a) => {
                self.store_uint(0b10, 2)?;
                self.store_bit(false)?; // no anycast
                self.store_uint(a.workchain as u8 as u64, 8)?;
                self.store_bytes(&a.hash)?;
            }
        }
        Ok(self)
    }

    pub fn store_ref(&mut self, cell: Arc<Cell>) -> Result<&mut Self, CellError> {
        if self.refs.len() >= MAX_CELL_REFS {
            return Err(CellError::RefOverflow);
        }
        self.refs.push(cell);
        Ok(self)
    }

    pub fn build(self) -> Arc<Cell> {
        Arc::new(Cell::new(self.data, self.bit_len, self.refs))
    }
}

/// Cursor reading data bits and references off a cell.
#[derive(Clone)]
pub struct Slice {
    cell: Arc<Cell>,
    bit_pos: usize,
    ref_pos: usize,
}

impl Slice {
    pub fn new(cell: Arc<Cell>) -> Self {
        Self { cell, bit_pos: 0, ref_pos: 0 }
    }

    pub fn bits_left(&self) -> usize {
        self.cell.bit_len() - self.bit_pos
    }

    pub fn refs_left(&self) -> usize {
        self.cell.refs().len() - self.ref_pos
    }

    pub fn load_bit(&mut self) -> Result<bool, CellError> {
        if self.bits_left() < 1 {
            return Err(CellError::Underflow { requested: 1, available: 0 });
        }
        let bit = self.cell.bit(self.bit_pos);
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u64, CellError> {
        debug_assert!(bits <= 64);
        if self.bits_left() < bits {
            return Err(CellError::Underflow { requested: bits, available: self.bits_left() });
        }
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | self.load_bit()? as u64;
        }
        Ok(value)
    }

    /// Load a two's-complement signed integer of up to 64 bits.
    pub fn load_int(&mut self, bits: usize) -> Result<i64, CellError> {
        let raw = self.load_uint(bits)?;
        if bits == 64 {
            return Ok(raw as i64);
        }
        // sign-extend
        if raw >> (bits - 1) & 1 == 1 {
            Ok((raw | !((1u64 << bits) - 1)) as i64)
        } else {
            Ok(raw as i64)
        }
    }

    pub fn load_big_uint(&mut self, bits: usize) -> Result<BigUint, CellError> {
        if self.bits_left() < bits {
            return Err(CellError::Underflow { requested: bits, available: self.bits_left() });
        }
        let mut value = BigUint::from(0u8);
        for _ in 0..bits {
            value = (value << 1u8) | BigUint::from(self.load_bit()? as u8);
        }
        Ok(value)
    }

    /// Load a signed big integer widened from a two's-complement wire field.
    pub fn load_big_int(&mut self, bits: usize) -> Result<BigInt, CellError> {
        if bits <= 64 {
            return Ok(BigInt::from(self.load_int(bits)?));
        }
        let raw = self.load_big_uint(bits)?;
        if (&raw >> (bits - 1)) == BigUint::from(1u8) {
            let modulus = BigUint::from(1u8) << bits;
            Ok(BigInt::from_biguint(Sign::Plus, raw) - BigInt::from_biguint(Sign::Plus, modulus))
        } else {
            Ok(BigInt::from_biguint(Sign::Plus, raw))
        }
    }

    pub fn load_bytes(&mut self, len: usize) -> Result<Vec<u8>, CellError> {
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.load_uint(8)? as u8);
        }
        Ok(out)
    }

    /// Load a `MsgAddress`: `addr_none` yields `None`, `addr_std` (without
    /// anycast) yields the address. Other forms are not used by the protocol.
    pub fn load_address(&mut self) -> Result<Option<TonAddress>, CellError> {
        match self.load_uint(2)? {
            0b00 => Ok(None),
            0b10 => {
                if self.load_bit()? {
                    return Err(CellError::InvalidAddress("anycast not supported".into()));
                }
                let workchain = self.load_uint(8)? as u8 as i8;
                let hash: [u8; 32] = self
                    .load_bytes(32)?
                    .try_into()
                    .expect("32 bytes requested");
                Ok(Some(TonAddress::new(workchain, hash)))
            }
            tag => Err(CellError::InvalidAddress(format!("address tag {tag:#b}"))),
        }
    }

    pub fn load_ref(&mut self) -> Result<Arc<Cell>, CellError> {
        let cell = self
            .cell
            .refs()
            .get(self.ref_pos)
            .cloned()
            .ok_or(CellError::RefUnderflow)?;
        self.ref_pos += 1;
        Ok(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_round_trip() {
        let mut b = CellBuilder::new();
        b.store_uint(0xdead_beef, 32).unwrap();
        b.store_uint(5, 3).unwrap();
        let cell = b.build();

        let mut s = cell.parse();
        assert_eq!(s.load_uint(32).unwrap(), 0xdead_beef);
        assert_eq!(s.load_uint(3).unwrap(), 5);
        assert_eq!(s.bits_left(), 0);
    }

    #[test]
    fn int_sign_extension() {
        let mut b = CellBuilder::new();
        b.store_int(-1_032_258_835, 64).unwrap();
        b.store_int(-3, 16).unwrap();
        b.store_int(1, 16).unwrap();
        let cell = b.build();

        let mut s = cell.parse();
        assert_eq!(s.load_int(64).unwrap(), -1_032_258_835);
        assert_eq!(s.load_int(16).unwrap(), -3);
        assert_eq!(s.load_int(16).unwrap(), 1);
    }

    #[test]
    fn big_uint_width() {
        let asset: BigUint = "11876925370864614464799087627157805050745321306404563164673853337929163193738"
            .parse()
            .unwrap();
        let mut b = CellBuilder::new();
        b.store_big_uint(&asset, 256).unwrap();
        let cell = b.build();
        assert_eq!(cell.bit_len(), 256);

        let mut s = cell.parse();
        assert_eq!(s.load_big_uint(256).unwrap(), asset);
    }

    #[test]
    fn address_round_trip() {
        let addr = TonAddress::parse("EQC8rUZqR_pWV1BylWUlPNBzyiTYVoBEmQkMIQDZXICfnuRr").unwrap();
        let mut b = CellBuilder::new();
        b.store_address(Some(&addr)).unwrap();
        b.store_address(None).unwrap();
        let cell = b.build();

        let mut s = cell.parse();
        assert_eq!(s.load_address().unwrap(), Some(addr));
        assert_eq!(s.load_address().unwrap(), None);
        assert_eq!(s.bits_left(), 0);
    }

    #[test]
    fn underflow_is_reported() {
        let mut b = CellBuilder::new();
        b.store_uint(7, 8).unwrap();
        let cell = b.build();

        let mut s = cell.parse();
        s.load_uint(4).unwrap();
        let err = s.load_uint(16).unwrap_err();
        assert!(matches!(err, CellError::Underflow { requested: 16, available: 4 }));
    }
}
