//! Memory window providers: `/dev/mem` for live hardware and an in-process
//! image for offline dumps and tests.

use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;
use std::rc::Rc;

use crate::{Address, DisassemblyError, MappedRegion, PhysicalMemory};

/// Path of the physical memory device
pub const DEV_MEM_PATH: &str = "/dev/mem";

/// Physical memory accessed through `/dev/mem`.
///
/// The device is opened once; every `map` is a separate read-only `mmap`
/// that is unmapped when the returned region is dropped.
#[derive(Debug)]
pub struct DevMem {
    file: File,
    page_size: usize,
}

impl DevMem {
    /// Open `/dev/mem`
    pub fn open() -> Result<Self, DisassemblyError> {
        Self::open_path(DEV_MEM_PATH)
    }

    /// Open a physical memory device at `path`
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, DisassemblyError> {
        let file = OpenOptions::new().read(true).open(path.as_ref()).map_err(|e| {
            DisassemblyError::Generic(format!(
                "Could not open {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        // SAFETY: sysconf has no preconditions.
        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            n if n > 0 => n as usize,
            _ => 4096,
        };

        Ok(Self { file, page_size })
    }
}

/// One live `mmap` of `/dev/mem`.
struct DevMemRegion {
    base: *mut libc::c_void,
    mapped_len: usize,
    page_offset: usize,
    size: usize,
}

impl MappedRegion for DevMemRegion {
    fn bytes(&self) -> &[u8] {
        // SAFETY: [base, base + mapped_len) stays mapped until drop, and
        // page_offset + size == mapped_len.
        unsafe { std::slice::from_raw_parts((self.base as *const u8).add(self.page_offset), self.size) }
    }
}

impl Drop for DevMemRegion {
    fn drop(&mut self) {
        // SAFETY: base/mapped_len are exactly what mmap returned.
        unsafe {
            libc::munmap(self.base, self.mapped_len);
        }
    }
}

impl PhysicalMemory for DevMem {
    fn map(&self, addr: Address, size: usize) -> Result<Box<dyn MappedRegion + '_>, DisassemblyError> {
        let map_err = |source: io::Error| DisassemblyError::Mapping { addr, size, source };

        if size == 0 {
            return Err(map_err(io::Error::new(io::ErrorKind::InvalidInput, "zero-sized mapping")));
        }

        // mmap offsets must be page aligned
        let page_base = addr as usize & !(self.page_size - 1);
        let page_offset = addr as usize - page_base;
        let mapped_len = page_offset + size;

        log::debug!("Mapping area: {:08x} of size {} bytes", addr, size);

        // SAFETY: a fresh shared read-only mapping of the device; no existing
        // memory is touched.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped_len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                page_base as libc::off_t,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(map_err(io::Error::last_os_error()));
        }

        Ok(Box::new(DevMemRegion {
            base,
            mapped_len,
            page_offset,
            size,
        }))
    }
}

/// How far past the end of an image a mapping may reach. Covers the largest
/// default search window.
pub const MAX_ZERO_TAIL: usize = 1024 * 1024;

/// A byte image standing in for physical memory at `base`.
///
/// Used to disassemble memory dumps offline and to drive the engine in
/// tests. A mapping must start inside the image and end no more than
/// `MAX_ZERO_TAIL` bytes past it; bytes past the end of the image read as
/// zero. Every request is recorded and live mappings are
/// counted, so callers can check that every mapping was released.
#[derive(Debug)]
pub struct ImageMemory {
    base: Address,
    data: Vec<u8>,
    requests: RefCell<Vec<(Address, usize)>>,
    live: Rc<Cell<usize>>,
}

impl ImageMemory {
    /// Wrap `data` as memory starting at physical address `base`
    pub fn new(base: Address, data: Vec<u8>) -> Self {
        Self {
            base,
            data,
            requests: RefCell::new(Vec::new()),
            live: Rc::new(Cell::new(0)),
        }
    }

    /// Load a raw image file (e.g. written by `dump`) located at `base`
    pub fn from_file<P: AsRef<Path>>(base: Address, path: P) -> Result<Self, DisassemblyError> {
        let data = std::fs::read(path)?;
        Ok(Self::new(base, data))
    }

    /// First physical address of the image
    pub fn base(&self) -> Address {
        self.base
    }

    /// Every `(addr, size)` passed to `map`, successful or not
    pub fn requests(&self) -> Vec<(Address, usize)> {
        self.requests.borrow().clone()
    }

    /// Largest size ever requested
    pub fn largest_request(&self) -> usize {
        self.requests.borrow().iter().map(|(_, size)| *size).max().unwrap_or(0)
    }

    /// Number of mappings not yet released
    pub fn live_mappings(&self) -> usize {
        self.live.get()
    }
}

struct ImageRegion {
    bytes: Vec<u8>,
    live: Rc<Cell<usize>>,
}

impl MappedRegion for ImageRegion {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for ImageRegion {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

impl PhysicalMemory for ImageMemory {
    fn map(&self, addr: Address, size: usize) -> Result<Box<dyn MappedRegion + '_>, DisassemblyError> {
        self.requests.borrow_mut().push((addr, size));

        let offset = addr.wrapping_sub(self.base) as usize;
        if addr < self.base || offset >= self.data.len() {
            return Err(DisassemblyError::Mapping {
                addr,
                size,
                source: io::Error::new(io::ErrorKind::AddrNotAvailable, "address outside memory image"),
            });
        }

        let limit = self.data.len() + MAX_ZERO_TAIL;
        if offset.checked_add(size).map_or(true, |end| end > limit) {
            return Err(DisassemblyError::Mapping {
                addr,
                size,
                source: io::Error::new(io::ErrorKind::InvalidInput, "mapping runs too far past the memory image"),
            });
        }

        let available = (self.data.len() - offset).min(size);
        let mut bytes = vec![0u8; size];
        bytes[..available].copy_from_slice(&self.data[offset..offset + available]);

        self.live.set(self.live.get() + 1);
        Ok(Box::new(ImageRegion {
            bytes,
            live: Rc::clone(&self.live),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_map_reads_bytes() {
        let mem = ImageMemory::new(0x1000, vec![1, 2, 3, 4]);
        let region = mem.map(0x1001, 2).unwrap();

        assert_eq!(region.bytes(), &[2, 3]);
        assert_eq!(mem.live_mappings(), 1);
        drop(region);
        assert_eq!(mem.live_mappings(), 0);
    }

    #[test]
    fn test_image_map_zero_fills_past_end() {
        let mem = ImageMemory::new(0x1000, vec![0xaa, 0xbb]);
        let region = mem.map(0x1001, 4).unwrap();

        assert_eq!(region.bytes(), &[0xbb, 0, 0, 0]);
    }

    #[test]
    fn test_image_map_outside_fails() {
        let mem = ImageMemory::new(0x1000, vec![0; 16]);

        assert!(matches!(mem.map(0x0fff, 4), Err(DisassemblyError::Mapping { addr: 0x0fff, .. })));
        assert!(matches!(mem.map(0x1010, 4), Err(DisassemblyError::Mapping { .. })));
        assert_eq!(mem.live_mappings(), 0);
        assert_eq!(mem.requests(), vec![(0x0fff, 4), (0x1010, 4)]);
    }

    #[test]
    fn test_image_map_zero_tail_is_bounded() {
        let mem = ImageMemory::new(0x1000, vec![0x11; 32]);

        let region = mem.map(0x1000, 32 + MAX_ZERO_TAIL).unwrap();
        assert_eq!(region.bytes().len(), 32 + MAX_ZERO_TAIL);
        drop(region);

        assert!(matches!(mem.map(0x1000, 33 + MAX_ZERO_TAIL), Err(DisassemblyError::Mapping { .. })));
        // Oversized requests fail before anything is allocated
        assert!(matches!(mem.map(0x1010, 4_000_000_000), Err(DisassemblyError::Mapping { .. })));
        assert!(matches!(mem.map(0x1010, usize::MAX), Err(DisassemblyError::Mapping { .. })));
        assert_eq!(mem.live_mappings(), 0);
    }

    #[test]
    fn test_dev_mem_missing_device() {
        let result = DevMem::open_path("/nonexistent/mem");
        assert!(matches!(result, Err(DisassemblyError::Generic(_))));
    }
}
