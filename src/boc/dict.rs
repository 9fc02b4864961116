//! Fixed-key-width dictionaries (`HashmapE`).
//!
//! User contracts keep their principal table as a dictionary keyed by the
//! 256-bit asset id. Reading walks the binary trie and accepts all three
//! label encodings; building always emits long labels, which every reader
//! accepts.

use std::sync::Arc;

use num_bigint::BigUint;

use super::{Cell, CellBuilder, CellError, Slice};

/// Walk a dictionary root cell and collect `(key, value slice)` pairs.
///
/// The value slice is positioned at the start of the stored value.
pub fn parse(root: &Arc<Cell>, key_bits: usize) -> Result<Vec<(BigUint, Slice)>, CellError> {
    let mut out = Vec::new();
    walk(root, BigUint::from(0u8), key_bits, &mut out)?;
    Ok(out)
}

fn walk(
    cell: &Arc<Cell>,
    prefix: BigUint,
    remaining: usize,
    out: &mut Vec<(BigUint, Slice)>,
) -> Result<(), CellError> {
    let mut slice = cell.parse();
    let (label, label_len) = read_label(&mut slice, remaining)?;
    if label_len > remaining {
        return Err(CellError::InvalidDict(format!(
            "label of {label_len} bits, {remaining} remaining"
        )));
    }
    let prefix = (prefix << label_len) | label;
    let remaining = remaining - label_len;

    if remaining == 0 {
        out.push((prefix, slice));
        return Ok(());
    }

    // Inner node: left edge extends with 0, right with 1.
    let left = slice.load_ref()?;
    let right = slice.load_ref()?;
    walk(&left, (prefix.clone() << 1u8) | BigUint::from(0u8), remaining - 1, out)?;
    walk(&right, (prefix << 1u8) | BigUint::from(1u8), remaining - 1, out)?;
    Ok(())
}

/// Read an edge label; `max` is the number of key bits still undetermined.
fn read_label(slice: &mut Slice, max: usize) -> Result<(BigUint, usize), CellError> {
    if !slice.load_bit()? {
        // hml_short: unary length, then the label bits
        let mut len = 0;
        while slice.load_bit()? {
            len += 1;
        }
        return Ok((slice.load_big_uint(len)?, len));
    }
    if !slice.load_bit()? {
        // hml_long: length field, then the label bits
        let len = slice.load_uint(len_bits(max))? as usize;
        return Ok((slice.load_big_uint(len)?, len));
    }
    // hml_same: one repeated bit
    let bit = slice.load_bit()?;
    let len = slice.load_uint(len_bits(max))? as usize;
    let label = if bit {
        (BigUint::from(1u8) << len) - BigUint::from(1u8)
    } else {
        BigUint::from(0u8)
    };
    Ok((label, len))
}

/// Build a dictionary from `(key, value)` pairs; `store` writes one value
/// inline at the edge cell. Returns `None` for an empty input.
pub fn build<V>(
    entries: &[(BigUint, V)],
    key_bits: usize,
    store: impl Fn(&mut CellBuilder, &V) -> Result<(), CellError> + Copy,
) -> Result<Option<Arc<Cell>>, CellError> {
    if entries.is_empty() {
        return Ok(None);
    }
    let mut sorted: Vec<(&BigUint, &V)> = entries.iter().map(|(k, v)| (k, v)).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    Ok(Some(build_node(&sorted, key_bits, key_bits, store)?))
}

fn build_node<V>(
    entries: &[(&BigUint, &V)],
    key_bits: usize,
    remaining: usize,
    store: impl Fn(&mut CellBuilder, &V) -> Result<(), CellError> + Copy,
) -> Result<Arc<Cell>, CellError> {
    let mut b = CellBuilder::new();

    if entries.len() == 1 {
        let (key, value) = entries[0];
        write_long_label(&mut b, key, key_bits, remaining, remaining)?;
        store(&mut b, value)?;
        return Ok(b.build());
    }

    // Longest common prefix of the undetermined key bits.
    let mut common = 0;
    'outer: while common < remaining - 1 {
        let bit = key_bit(entries[0].0, key_bits, key_bits - remaining + common);
        for (key, _) in &entries[1..] {
            if key_bit(key, key_bits, key_bits - remaining + common) != bit {
                break 'outer;
            }
        }
        common += 1;
    }
    write_long_label(&mut b, entries[0].0, key_bits, remaining, common)?;

    let split = entries
        .iter()
        .position(|(key, _)| key_bit(key, key_bits, key_bits - remaining + common))
        .expect("keys are distinct and sorted, both branches populated");
    let (left, right) = entries.split_at(split);
    let child_remaining = remaining - common - 1;
    b.store_ref(build_node(left, key_bits, child_remaining, store)?)?;
    b.store_ref(build_node(right, key_bits, child_remaining, store)?)?;
    Ok(b.build())
}

/// `hml_long`: `10`, the length field, then the label bits taken from `key`.
fn write_long_label(
    b: &mut CellBuilder,
    key: &BigUint,
    key_bits: usize,
    remaining: usize,
    len: usize,
) -> Result<(), CellError> {
    b.store_uint(0b10, 2)?;
    b.store_uint(len as u64, len_bits(remaining))?;
    for i in 0..len {
        b.store_bit(key_bit(key, key_bits, key_bits - remaining + i))?;
    }
    Ok(())
}

fn key_bit(key: &BigUint, key_bits: usize, index: usize) -> bool {
    ((key >> (key_bits - 1 - index)) & BigUint::from(1u8)) == BigUint::from(1u8)
}

fn len_bits(max: usize) -> usize {
    (usize::BITS - max.leading_zeros()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: &str) -> BigUint {
        id.parse().unwrap()
    }

    #[test]
    fn empty_dict_builds_to_none() {
        let entries: Vec<(BigUint, i64)> = vec![];
        assert!(build(&entries, 256, |b, v| b.store_int(*v, 64).map(|_| ())).unwrap().is_none());
    }

    #[test]
    fn single_entry_round_trip() {
        let entries = vec![(asset("42"), -7i64)];
        let root = build(&entries, 256, |b, v| b.store_int(*v, 64).map(|_| ()))
            .unwrap()
            .unwrap();

        let parsed = parse(&root, 256).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, asset("42"));
        assert_eq!(parsed[0].1.clone().load_int(64).unwrap(), -7);
    }

    #[test]
    fn principal_table_round_trip() {
        // real asset ids from the main pool catalogue
        let entries = vec![
            (
                asset("11876925370864614464799087627157805050745321306404563164673853337929163193738"),
                -1_032_258_835i64,
            ),
            (
                asset("91621667903763073563570557639433445791506232618002614896981036659302854767224"),
                250_000_000i64,
            ),
            (
                asset("33171510858320790266247832496974106978700190498800858393089426423762035476944"),
                0i64,
            ),
        ];
        let root = build(&entries, 256, |b, v| b.store_int(*v, 64).map(|_| ()))
            .unwrap()
            .unwrap();

        let mut parsed: Vec<(BigUint, i64)> = parse(&root, 256)
            .unwrap()
            .into_iter()
            .map(|(k, mut v)| (k, v.load_int(64).unwrap()))
            .collect();
        parsed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut expected = entries;
        expected.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(parsed, expected);
    }
}
