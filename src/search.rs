//! Signature scan for the start of binning control lists.

use crate::{Address, DisassemblyError, PhysicalMemory};

/// A byte that must appear at a fixed offset from the match start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureByte {
    pub offset: usize,
    pub value: u8,
}

/// STATE_TILE_BINNING_MODE (its final flags byte), START_TILE_BINNING and
/// PRIMITIVE_LIST_FORMAT as a binning list emits them back to back.
pub const BIN_LIST_SIGNATURE: [SignatureByte; 5] = [
    SignatureByte { offset: 0, value: 0x70 },
    SignatureByte { offset: 15, value: 0x44 },
    SignatureByte { offset: 16, value: 0x06 },
    SignatureByte { offset: 17, value: 0x38 },
    SignatureByte { offset: 18, value: 0x12 },
];

/// Number of bytes a signature spans
pub fn signature_span(signature: &[SignatureByte]) -> usize {
    signature.iter().map(|b| b.offset + 1).max().unwrap_or(0)
}

/// Offsets of every non-overlapping match of `signature` in `bytes`.
pub fn find_signature(bytes: &[u8], signature: &[SignatureByte]) -> Vec<usize> {
    let span = signature_span(signature);
    let mut matches = Vec::new();

    if span == 0 || bytes.len() < span {
        return matches;
    }

    let mut pos = 0;
    while pos + span <= bytes.len() {
        if signature.iter().all(|b| bytes[pos + b.offset] == b.value) {
            matches.push(pos);
            pos += span;
        } else {
            pos += 1;
        }
    }

    matches
}

/// Scan `size` bytes at `start` for binning list starts.
pub fn search(memory: &dyn PhysicalMemory, start: Address, size: usize) -> Result<Vec<Address>, DisassemblyError> {
    if size == 0 {
        return Ok(Vec::new());
    }

    let region = memory.map(start, size)?;
    let found: Vec<Address> = find_signature(region.bytes(), &BIN_LIST_SIGNATURE)
        .into_iter()
        .map(|offset| start.wrapping_add(offset as Address))
        .collect();

    log::debug!("Searched {} bytes at {:08x}: {} match(es)", size, start, found.len());

    Ok(found)
}
