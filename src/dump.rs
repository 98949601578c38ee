//! Raw physical memory copy.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::{Address, DisassemblyError, PhysicalMemory};

/// Bytes mapped per step when copying
const DUMP_CHUNK_SIZE: usize = 1024 * 1024;

/// Copy `size` bytes starting at `addr` into `out`, returning the count written.
pub fn dump_to_writer<W: Write>(
    memory: &dyn PhysicalMemory,
    addr: Address,
    size: usize,
    out: &mut W,
) -> Result<usize, DisassemblyError> {
    let mut written = 0;

    while written < size {
        let chunk = (size - written).min(DUMP_CHUNK_SIZE);
        let chunk_addr = addr.checked_add(written as Address).ok_or_else(|| {
            DisassemblyError::Generic(format!("Dump of {} bytes at {:08x} overflows the address space", size, addr))
        })?;

        let region = memory.map(chunk_addr, chunk)?;
        out.write_all(region.bytes())?;
        written += chunk;
    }

    out.flush()?;
    log::info!("Dumped {} bytes from {:08x}", written, addr);

    Ok(written)
}

/// Copy `size` bytes starting at `addr` into the file at `path`.
pub fn dump_to_file<P: AsRef<Path>>(
    memory: &dyn PhysicalMemory,
    addr: Address,
    size: usize,
    path: P,
) -> Result<usize, DisassemblyError> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    dump_to_writer(memory, addr, size, &mut writer)
}
