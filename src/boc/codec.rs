use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::{Cell, CellError};

const BOC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];

const FLAG_HAS_IDX: u8 = 0x80;

/// Parse a base64 bag of cells, as returned by the chain API.
pub fn from_boc_base64(encoded: &str) -> Result<Arc<Cell>, CellError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CellError::InvalidBoc(format!("base64: {e}")))?;
    from_boc(&bytes)
}

/// Parse the standard serialised cell-tree format and return the root cell.
pub fn from_boc(bytes: &[u8]) -> Result<Arc<Cell>, CellError> {
    let mut r = Reader::new(bytes);

    if r.take(4)? != BOC_MAGIC {
        return Err(CellError::InvalidBoc("bad magic".into()));
    }

    let flags = r.byte()?;
    let ref_size = (flags & 0x07) as usize;
    if ref_size == 0 || ref_size > 4 {
        return Err(CellError::InvalidBoc(format!("reference size {ref_size}")));
    }
    let off_size = r.byte()? as usize;
    if off_size == 0 || off_size > 8 {
        return Err(CellError::InvalidBoc(format!("offset size {off_size}")));
    }

    let cell_count = r.uint(ref_size)? as usize;
    let root_count = r.uint(ref_size)? as usize;
    let absent = r.uint(ref_size)?;
    let _total_size = r.uint(off_size)?;

    if root_count == 0 {
        return Err(CellError::InvalidBoc("no root cells".into()));
    }
    if absent != 0 {
        return Err(CellError::InvalidBoc("absent cells not supported".into()));
    }

    let mut roots = Vec::with_capacity(root_count);
    for _ in 0..root_count {
        roots.push(r.uint(ref_size)? as usize);
    }

    if flags & FLAG_HAS_IDX != 0 {
        r.skip(cell_count * off_size)?;
    }

    // First pass: raw descriptors and forward reference indices.
    struct RawCell {
        data: Vec<u8>,
        bit_len: usize,
        refs: Vec<usize>,
    }
    let mut raw = Vec::with_capacity(cell_count);
    for index in 0..cell_count {
        let d1 = r.byte()?;
        if d1 & 0x08 != 0 {
            return Err(CellError::InvalidBoc("exotic cells not supported".into()));
        }
        let ref_count = (d1 & 0x07) as usize;
        let d2 = r.byte()? as usize;
        let byte_len = d2.div_ceil(2);
        let data = r.take(byte_len)?.to_vec();
        let bit_len = if d2 % 2 == 0 {
            byte_len * 8
        } else {
            // completion tag: one marker bit then zeros
            let last = *data.last().ok_or_else(|| CellError::InvalidBoc("empty padded cell".into()))?;
            if last == 0 {
                return Err(CellError::InvalidBoc("missing completion tag".into()));
            }
            byte_len * 8 - 1 - last.trailing_zeros() as usize
        };
        let mut refs = Vec::with_capacity(ref_count);
        for _ in 0..ref_count {
            let target = r.uint(ref_size)? as usize;
            if target <= index || target >= cell_count {
                return Err(CellError::InvalidBoc(format!(
                    "cell {index} references {target}"
                )));
            }
            refs.push(target);
        }
        raw.push(RawCell { data, bit_len, refs });
    }

    // Second pass, bottom-up: references always point forward.
    let mut cells: Vec<Option<Arc<Cell>>> = vec![None; cell_count];
    for index in (0..cell_count).rev() {
        let rc = &raw[index];
        let refs = rc
            .refs
            .iter()
            .map(|&t| cells[t].clone().expect("forward reference already built"))
            .collect();
        cells[index] = Some(Arc::new(Cell::new(rc.data.clone(), rc.bit_len, refs)));
    }

    let root = roots[0];
    cells
        .get(root)
        .and_then(|c| c.clone())
        .ok_or_else(|| CellError::InvalidBoc(format!("root index {root}")))
}

/// Serialise a cell tree in the standard format (single root, no index, no
/// checksum).
pub fn to_boc(root: &Arc<Cell>) -> Vec<u8> {
    // Topological order with parents before children, deduplicated by hash.
    let mut order: Vec<Arc<Cell>> = Vec::new();
    let mut seen: Vec<[u8; 32]> = Vec::new();
    fn visit(cell: &Arc<Cell>, order: &mut Vec<Arc<Cell>>, seen: &mut Vec<[u8; 32]>) {
        let hash = cell.repr_hash();
        if seen.contains(&hash) {
            return;
        }
        seen.push(hash);
        order.push(cell.clone());
        for r in cell.refs() {
            visit(r, order, seen);
        }
    }
    visit(root, &mut order, &mut seen);

    // Shared subtrees can appear before a later parent in plain pre-order;
    // deepest-first ordering guarantees every reference points forward.
    order.sort_by_key(|c| std::cmp::Reverse(c.depth()));

    let index_of = |cell: &Arc<Cell>| -> usize {
        let hash = cell.repr_hash();
        order
            .iter()
            .position(|c| c.repr_hash() == hash)
            .expect("cell collected during visit")
    };

    let mut payload = Vec::new();
    let ref_size = byte_width(order.len() as u64);
    for cell in &order {
        payload.extend_from_slice(&cell.descriptor_bytes());
        payload.extend_from_slice(&cell.padded_data());
        for r in cell.refs() {
            payload.extend_from_slice(&be_bytes(index_of(r) as u64, ref_size));
        }
    }

    let off_size = byte_width(payload.len() as u64);
    let mut out = Vec::with_capacity(payload.len() + 16);
    out.extend_from_slice(&BOC_MAGIC);
    out.push(ref_size as u8);
    out.push(off_size as u8);
    out.extend_from_slice(&be_bytes(order.len() as u64, ref_size));
    out.extend_from_slice(&be_bytes(1, ref_size)); // roots
    out.extend_from_slice(&be_bytes(0, ref_size)); // absent
    out.extend_from_slice(&be_bytes(payload.len() as u64, off_size));
    out.extend_from_slice(&be_bytes(0, ref_size)); // root index
    out.extend_from_slice(&payload);
    out
}

/// Serialise and base64-encode, the form the chain API uses for bodies.
pub fn to_boc_base64(root: &Arc<Cell>) -> String {
    STANDARD.encode(to_boc(root))
}

fn byte_width(value: u64) -> usize {
    let mut width = 1;
    while value >> (width * 8) != 0 {
        width += 1;
    }
    width
}

fn be_bytes(value: u64, width: usize) -> Vec<u8> {
    value.to_be_bytes()[8 - width..].to_vec()
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CellError> {
        if self.pos + len > self.bytes.len() {
            return Err(CellError::InvalidBoc("truncated".into()));
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, CellError> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, width: usize) -> Result<u64, CellError> {
        let mut value = 0u64;
        for b in self.take(width)? {
            value = (value << 8) | *b as u64;
        }
        Ok(value)
    }

    fn skip(&mut self, len: usize) -> Result<(), CellError> {
        self.take(len).map(|_| ())
    }
}
