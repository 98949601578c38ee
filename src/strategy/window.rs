//! Growable mapped window over a buffer of unknown length.

use crate::{Address, DisassemblyError, MappedRegion, PhysicalMemory};

/// A doubling view over physical memory starting at a fixed address.
///
/// The cursor is an offset from the window start, so it stays valid across
/// remaps. The mapping is released whenever the window is dropped.
pub struct DisassemblyWindow<'m> {
    memory: &'m dyn PhysicalMemory,
    start: Address,
    end: Option<Address>,
    size: usize,
    cap: usize,
    cursor: usize,
    region: Option<Box<dyn MappedRegion + 'm>>,
}

impl<'m> DisassemblyWindow<'m> {
    /// Create an unmapped window of logical size `initial_size`.
    ///
    /// The first `grow` maps twice that size.
    pub fn new(
        memory: &'m dyn PhysicalMemory,
        start: Address,
        end: Option<Address>,
        initial_size: usize,
        cap: usize,
    ) -> Self {
        Self {
            memory,
            start,
            end,
            size: initial_size.max(1),
            cap,
            cursor: 0,
            region: None,
        }
    }

    /// Release the current mapping, double the size and map again.
    ///
    /// Fails without mapping anything once the size would pass the cap.
    pub fn grow(&mut self) -> Result<(), DisassemblyError> {
        self.region = None;
        self.size *= 2;

        log::debug!(
            "Expanding disassembly area at {:08x} to {} bytes (cursor offset {})",
            self.start,
            self.size,
            self.cursor
        );

        if self.size > self.cap {
            return Err(DisassemblyError::GrowthCapExceeded {
                start: self.start,
                size: self.size,
                cap: self.cap,
            });
        }

        self.region = Some(self.memory.map(self.start, self.size)?);
        Ok(())
    }

    /// Bytes currently mapped; zero when unmapped
    pub fn mapped_len(&self) -> usize {
        self.region.as_ref().map_or(0, |r| r.bytes().len())
    }

    /// Cursor offset from the window start
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor forward
    pub fn advance(&mut self, len: usize) {
        self.cursor += len;
    }

    /// The known end as an offset, or None to run until a terminal opcode
    pub fn end_offset(&self) -> Option<usize> {
        self.end.map(|end| end.saturating_sub(self.start) as usize)
    }

    /// Whether the cursor has reached a known end
    pub fn at_end(&self) -> bool {
        self.end_offset().is_some_and(|end| self.cursor >= end)
    }

    /// Physical address of a window offset
    pub fn address_of(&self, offset: usize) -> Address {
        self.start.wrapping_add(offset as Address)
    }

    /// Physical address of the cursor
    pub fn cursor_address(&self) -> Address {
        self.address_of(self.cursor)
    }

    /// Mapped bytes from the cursor to the end of the window
    pub fn bytes_at_cursor(&self) -> &[u8] {
        match &self.region {
            Some(region) => region.bytes().get(self.cursor..).unwrap_or(&[]),
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ImageMemory;

    #[test]
    fn test_window_starts_unmapped() {
        let mem = ImageMemory::new(0x1000, vec![0xab; 64]);
        let window = DisassemblyWindow::new(&mem, 0x1000, None, 1, 64);

        assert_eq!(window.mapped_len(), 0);
        assert!(window.bytes_at_cursor().is_empty());
        assert!(mem.requests().is_empty());
    }

    #[test]
    fn test_grow_doubles_and_keeps_cursor() {
        let mem = ImageMemory::new(0x1000, (0..64).collect());
        let mut window = DisassemblyWindow::new(&mem, 0x1000, None, 1, 64);

        window.grow().unwrap();
        assert_eq!(window.mapped_len(), 2);
        window.advance(1);
        assert_eq!(window.bytes_at_cursor(), &[1]);

        window.grow().unwrap();
        assert_eq!(window.mapped_len(), 4);
        assert_eq!(window.cursor(), 1);
        assert_eq!(window.bytes_at_cursor(), &[1, 2, 3]);
        assert_eq!(window.cursor_address(), 0x1001);

        assert_eq!(mem.requests(), vec![(0x1000, 2), (0x1000, 4)]);
        assert_eq!(mem.live_mappings(), 1);
    }

    #[test]
    fn test_grow_past_cap_fails_without_mapping() {
        let mem = ImageMemory::new(0x1000, vec![0; 64]);
        let mut window = DisassemblyWindow::new(&mem, 0x1000, None, 8, 16);

        window.grow().unwrap();
        let err = window.grow().unwrap_err();

        assert!(matches!(err, DisassemblyError::GrowthCapExceeded { size: 32, cap: 16, .. }));
        assert_eq!(mem.largest_request(), 16);
        assert_eq!(mem.live_mappings(), 0);
    }

    #[test]
    fn test_end_offset() {
        let mem = ImageMemory::new(0x1000, vec![0; 64]);

        let window = DisassemblyWindow::new(&mem, 0x1000, Some(0x1010), 1, 64);
        assert_eq!(window.end_offset(), Some(0x10));
        assert!(!window.at_end());

        let backwards = DisassemblyWindow::new(&mem, 0x1000, Some(0x0800), 1, 64);
        assert_eq!(backwards.end_offset(), Some(0));
        assert!(backwards.at_end());

        let open = DisassemblyWindow::new(&mem, 0x1000, None, 1, 64);
        assert!(!open.at_end());
    }
}
