//! Core IR, traits, and error types for the `cl_dump` control list disassembler.
//!
//! The V3D (VideoCore IV) GPU is driven by control lists: byte streams of
//! variable-length instructions that point at further control lists, shader
//! records and QPU programs. None of those buffers carry their own length, so
//! this crate walks physical memory with a growing window, follows every
//! reference it decodes through a worklist, and collects a listing per buffer.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use cl_dump::{
//!     decoder::V3dDecoder,
//!     driver::{Disassembler, DisassemblerConfig},
//!     format::OutputFormat,
//!     memory::DevMem,
//!     BufferDescriptor,
//! };
//!
//! // Open /dev/mem once
//! let memory = DevMem::open().unwrap();
//! let decoder = V3dDecoder::new();
//!
//! // Walk a control list of unknown length and everything it references
//! let disassembler = Disassembler::new(&memory, &decoder, DisassemblerConfig::default());
//! let disassembly = disassembler.run(BufferDescriptor::control_list(0x1e00_0000, None));
//!
//! let text = OutputFormat::Text.get_formatter().format(&disassembly).unwrap();
//! print!("{}", text);
//! ```

pub mod decoder;
pub mod driver;
pub mod dump;
pub mod format;
pub mod memory;
pub mod search;
pub mod strategy;

/// A physical (bus) address on the GPU side
pub type Address = u32;

use std::fmt;
use std::io;
use clap::ValueEnum;

use crate::decoder::Opcode;

/// The kinds of buffer the disassembler knows how to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum BufferKind {
    /// A control list of variable-length CLE instructions
    Cl,
    /// A GL shader record followed by attribute array records
    GlShaderRecord,
    /// A GL shader record flagged as extended by its GL_SHADER instruction
    GlShaderRecordExtended,
    /// Raw QPU machine code, 64 bits per instruction
    QpuProgram,
    /// An NV ("no vertex shading") shader record
    NvShaderRecord,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferKind::Cl => write!(f, "CL"),
            BufferKind::GlShaderRecord => write!(f, "GL shader record"),
            BufferKind::GlShaderRecordExtended => write!(f, "GL shader record (extended)"),
            BufferKind::QpuProgram => write!(f, "QPU program"),
            BufferKind::NvShaderRecord => write!(f, "NV shader record"),
        }
    }
}

/// A discovered buffer awaiting disassembly.
///
/// This is pure address data; it never owns a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    /// What the buffer holds
    pub kind: BufferKind,
    /// First byte of the buffer
    pub start: Address,
    /// One past the last byte, when known
    pub end: Option<Address>,
}

impl BufferDescriptor {
    /// Create a new descriptor
    pub fn new(kind: BufferKind, start: Address, end: Option<Address>) -> Self {
        Self { kind, start, end }
    }

    /// A control list at `start`
    pub fn control_list(start: Address, end: Option<Address>) -> Self {
        Self::new(BufferKind::Cl, start, end)
    }

    /// A QPU program of unknown length
    pub fn qpu_program(start: Address) -> Self {
        Self::new(BufferKind::QpuProgram, start, None)
    }
}

impl fmt::Display for BufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{} buf start: {:08x} end: {:08x}", self.kind, self.start, end),
            None => write!(f, "{} buf start: {:08x} end: unknown", self.kind, self.start),
        }
    }
}

/// One decoded control list instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClInsn {
    /// The instruction's opcode
    pub opcode: Opcode,
    /// Raw encoding, opcode byte included
    pub bytes: Vec<u8>,
    /// Decoded argument fields in encoding order
    pub fields: Vec<(&'static str, u64)>,
}

impl ClInsn {
    /// Size of the instruction in bytes
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Look up a decoded field by name
    pub fn field(&self, name: &str) -> Option<u64> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| *value)
    }

    /// Target of a BRANCH or BRANCH_SUB
    pub fn branch_target(&self) -> Option<Address> {
        match self.opcode {
            Opcode::Branch | Opcode::BranchSub => self.field("branch_addr").map(|v| v as Address),
            _ => None,
        }
    }

    /// Raw shader record address field of a GL_SHADER or NV_SHADER.
    ///
    /// For GL_SHADER this is the encoded value, still in 16-byte units.
    pub fn shader_record_addr(&self) -> Option<Address> {
        match self.opcode {
            Opcode::GlShader | Opcode::NvShader => {
                self.field("shader_record_addr").map(|v| v as Address)
            }
            _ => None,
        }
    }

    /// Number of attribute arrays a GL_SHADER's record carries
    pub fn num_attr_arrays(&self) -> Option<u32> {
        match self.opcode {
            Opcode::GlShader => self.field("num_attr_arrays").map(|v| v as u32),
            _ => None,
        }
    }

    /// Whether a GL_SHADER points at an extended shader record
    pub fn extended_record(&self) -> Option<bool> {
        match self.opcode {
            Opcode::GlShader => self.field("extended_record").map(|v| v != 0),
            _ => None,
        }
    }

    /// True for HALT, BRANCH and RETURN, the instructions after which a
    /// control list does not continue in line.
    pub fn is_terminal(&self) -> bool {
        self.opcode.is_terminal()
    }
}

impl fmt::Display for ClInsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode.name())?;
        for (name, value) in &self.fields {
            write!(f, " {}=0x{:x}", name, value)?;
        }
        Ok(())
    }
}

/// Result of decoding the bytes at a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A recognised instruction
    Insn(ClInsn),
    /// The opcode byte is not a known instruction
    Invalid { byte: u8 },
}

/// Decoder trait: control list instruction set.
pub trait ClDecoder {
    /// Length in bytes of the instruction whose opcode is `bytes[0]`.
    ///
    /// Only the opcode byte is inspected, so this can be asked before the
    /// whole instruction is mapped. Returns None for an invalid opcode.
    fn insn_len(&self, bytes: &[u8]) -> Option<usize>;

    /// Decode one instruction starting at `bytes[0]`.
    ///
    /// A slice shorter than the instruction decodes as invalid.
    fn decode(&self, bytes: &[u8]) -> Decoded;
}

/// A region of physical memory mapped into the process.
///
/// Dropping the region releases the mapping.
pub trait MappedRegion {
    /// The mapped bytes, exactly as long as the requested size
    fn bytes(&self) -> &[u8];
}

/// Memory window provider: maps physical ranges on demand.
pub trait PhysicalMemory {
    /// Map `size` bytes starting at physical address `addr`.
    fn map(&self, addr: Address, size: usize) -> Result<Box<dyn MappedRegion + '_>, DisassemblyError>;
}

/// One line of a buffer listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A decoded instruction, record or program word
    Decoded { addr: Address, text: String },
    /// An unrecognised control list opcode
    Invalid { addr: Address, byte: u8 },
}

impl Line {
    /// Physical address the line describes
    pub fn addr(&self) -> Address {
        match self {
            Line::Decoded { addr, .. } | Line::Invalid { addr, .. } => *addr,
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Decoded { addr, text } => write!(f, "{:08x}: {}", addr, text),
            Line::Invalid { addr, byte } => write!(f, "{:08x}: INVALID OPCODE ({})", addr, byte),
        }
    }
}

/// Everything produced while processing one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferListing {
    /// The buffer that was processed
    pub descriptor: BufferDescriptor,
    /// Lines emitted, including those emitted before a failure
    pub lines: Vec<Line>,
    /// Why processing stopped early, if it did
    pub error: Option<String>,
}

impl BufferListing {
    /// Create an empty listing for `descriptor`
    pub fn new(descriptor: BufferDescriptor) -> Self {
        Self {
            descriptor,
            lines: Vec::new(),
            error: None,
        }
    }

    /// Whether the buffer was processed to completion
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Unified disassembly output: one listing per processed descriptor, in
/// dispatch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disassembly {
    /// Listings in the order their buffers were popped from the worklist
    pub listings: Vec<BufferListing>,
}

impl Disassembly {
    /// Total number of lines across all listings
    pub fn line_count(&self) -> usize {
        self.listings.iter().map(|l| l.lines.len()).sum()
    }

    /// Listings whose processing failed
    pub fn failures(&self) -> impl Iterator<Item = &BufferListing> {
        self.listings.iter().filter(|l| !l.succeeded())
    }

    /// Listings of one buffer kind
    pub fn of_kind(&self, kind: BufferKind) -> impl Iterator<Item = &BufferListing> {
        self.listings.iter().filter(move |l| l.descriptor.kind == kind)
    }
}

/// Parse a `0x`-prefixed hexadecimal address.
pub fn parse_address(s: &str) -> Result<Address, DisassemblyError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| {
            DisassemblyError::ArgumentFormat(format!("Addresses must be of form 0x1234ABCD, got '{}'", s))
        })?;

    Address::from_str_radix(digits, 16).map_err(|e| {
        DisassemblyError::ArgumentFormat(format!("Invalid address '{}': {}", s, e))
    })
}

/// Parse a decimal byte count.
pub fn parse_size(s: &str) -> Result<usize, DisassemblyError> {
    s.parse::<usize>().map_err(|e| {
        DisassemblyError::ArgumentFormat(format!("Size must be a decimal integer, got '{}': {}", s, e))
    })
}

/// Error type for disassembly operations
#[derive(Debug, thiserror::Error)]
pub enum DisassemblyError {
    /// Malformed address or size literal
    #[error("{0}")]
    ArgumentFormat(String),

    /// The memory window provider could not map a range
    #[error("Failed to map {size} bytes at {addr:08x}: {source}")]
    Mapping {
        addr: Address,
        size: usize,
        #[source]
        source: io::Error,
    },

    /// A control list grew past the window cap without terminating
    #[error("Runaway disassembly area at {start:08x}: {size} bytes exceeds the {cap} byte limit")]
    GrowthCapExceeded {
        start: Address,
        size: usize,
        cap: usize,
    },

    /// A record descriptor whose end lies before its start
    #[error("Invalid buffer range {start:08x}..{end:08x}")]
    InvalidRange { start: Address, end: Address },

    /// A record descriptor too small to hold the record header
    #[error("Record at {start:08x} is {size} bytes, need at least {needed}")]
    RecordTooShort {
        start: Address,
        size: usize,
        needed: usize,
    },

    /// No program end signal within the QPU search limit
    #[error("No program end signal within {searched} bytes of {start:08x}")]
    QpuEndNotFound { start: Address, searched: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::V3dDecoder;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x1234ABCD").unwrap(), 0x1234_abcd);
        assert_eq!(parse_address("0X10").unwrap(), 0x10);
        assert!(matches!(parse_address("1234"), Err(DisassemblyError::ArgumentFormat(_))));
        assert!(matches!(parse_address("0xZZ"), Err(DisassemblyError::ArgumentFormat(_))));
        assert!(matches!(parse_address("0x123456789"), Err(DisassemblyError::ArgumentFormat(_))));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert!(matches!(parse_size("0x10"), Err(DisassemblyError::ArgumentFormat(_))));
    }

    #[test]
    fn test_insn_accessors() {
        let decoder = V3dDecoder::new();
        // GL_SHADER: 2 attribute arrays, extended, record at 0x1234560 >> 4
        let word: u32 = 2 | (1 << 3) | (0x0123_4560 >> 4 << 4);
        let mut bytes = vec![64];
        bytes.extend_from_slice(&word.to_le_bytes());

        let insn = match decoder.decode(&bytes) {
            Decoded::Insn(insn) => insn,
            other => panic!("Expected an instruction, got {:?}", other),
        };

        assert_eq!(insn.size(), 5);
        assert_eq!(insn.num_attr_arrays(), Some(2));
        assert_eq!(insn.extended_record(), Some(true));
        assert_eq!(insn.shader_record_addr(), Some(0x0123_456));
        assert_eq!(insn.branch_target(), None);
        assert!(!insn.is_terminal());
    }

    #[test]
    fn test_line_display() {
        let line = Line::Decoded { addr: 0x1000, text: "NOP".to_string() };
        assert_eq!(line.to_string(), "00001000: NOP");

        let invalid = Line::Invalid { addr: 0x1001, byte: 3 };
        assert_eq!(invalid.to_string(), "00001001: INVALID OPCODE (3)");
        assert_eq!(invalid.addr(), 0x1001);
    }

    #[test]
    fn test_descriptor_display() {
        let desc = BufferDescriptor::control_list(0x1000_2000, None);
        assert_eq!(desc.to_string(), "CL buf start: 10002000 end: unknown");

        let desc = BufferDescriptor::new(BufferKind::NvShaderRecord, 0x10, Some(0x20));
        assert_eq!(desc.to_string(), "NV shader record buf start: 00000010 end: 00000020");
    }
}
