//! GL and NV shader record disassembly.
//!
//! Records have a size fixed by the instruction that referenced them, so
//! they are mapped exactly once, `[start, end)`.

use std::fmt;

use crate::decoder::{packed_size, unpack_fields, Field};
use crate::strategy::Context;
use crate::{Address, BufferDescriptor, BufferKind, DisassemblyError, Line, MappedRegion, PhysicalMemory};

/// Bit-packed layout of a record that is not a CL instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    /// Name printed in listings
    pub name: &'static str,
    /// Fields in encoding order
    pub fields: &'static [Field],
}

const fn f(name: &'static str, bits: u32) -> Field {
    Field { name, bits }
}

/// GL shader record header (36 bytes)
pub const GL_SHADER_RECORD: RecordLayout = RecordLayout {
    name: "GL_SHADER_RECORD",
    fields: &[
        f("flags", 16),
        f("fs_num_uniforms", 8),
        f("fs_num_varyings", 8),
        f("fs_code_addr", 32),
        f("fs_uniforms_addr", 32),
        f("vs_num_uniforms", 16),
        f("vs_attr_array_select", 8),
        f("vs_total_attr_size", 8),
        f("vs_code_addr", 32),
        f("vs_uniforms_addr", 32),
        f("cs_num_uniforms", 16),
        f("cs_attr_array_select", 8),
        f("cs_total_attr_size", 8),
        f("cs_code_addr", 32),
        f("cs_uniforms_addr", 32),
    ],
};

/// Attribute array record following a GL shader record (8 bytes)
pub const ATTR_ARRAY_RECORD: RecordLayout = RecordLayout {
    name: "ATTR_ARRAY_RECORD",
    fields: &[
        f("array_base_addr", 32),
        f("array_size_bytes", 8),
        f("array_stride", 8),
        f("array_vs_vpm_offset", 8),
        f("array_cs_vpm_offset", 8),
    ],
};

/// NV shader record (16 bytes)
pub const NV_SHADER_RECORD: RecordLayout = RecordLayout {
    name: "NV_SHADER_RECORD",
    fields: &[
        f("flags", 8),
        f("stride", 8),
        f("fs_num_uniforms", 8),
        f("fs_num_varyings", 8),
        f("fs_code_addr", 32),
        f("fs_uniforms_addr", 32),
        f("vertex_data_addr", 32),
    ],
};

/// Shader code referenced by a GL record: fragment, vertex, coordinate
const GL_CODE_FIELDS: [&str; 3] = ["fs_code_addr", "vs_code_addr", "cs_code_addr"];

impl RecordLayout {
    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        packed_size(self.fields)
    }

    /// Decode one record from the start of `bytes`
    pub fn decode(&self, bytes: &[u8]) -> DecodedRecord {
        DecodedRecord {
            name: self.name,
            fields: unpack_fields(bytes, self.fields),
        }
    }
}

/// A decoded record's field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub name: &'static str,
    pub fields: Vec<(&'static str, u64)>,
}

impl DecodedRecord {
    /// Value of a named field
    pub fn get(&self, name: &str) -> Option<u64> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }
}

impl fmt::Display for DecodedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (name, value) in &self.fields {
            write!(f, " {}=0x{:x}", name, value)?;
        }
        Ok(())
    }
}

/// Map `[start, end)` after checking it can hold `needed` bytes.
fn map_record<'m>(
    memory: &'m dyn PhysicalMemory,
    start: Address,
    end: Address,
    needed: usize,
) -> Result<Box<dyn MappedRegion + 'm>, DisassemblyError> {
    if end < start {
        return Err(DisassemblyError::InvalidRange { start, end });
    }

    let size = (end - start) as usize;
    if size < needed {
        return Err(DisassemblyError::RecordTooShort { start, size, needed });
    }

    memory.map(start, size)
}

/// Disassemble a GL shader record and its attribute array records.
///
/// The attribute count is implied by the range: every whole 8-byte record
/// after the header is printed. A descriptor without an end covers the
/// header alone.
pub fn run_gl(desc: &BufferDescriptor, ctx: &mut Context<'_>, lines: &mut Vec<Line>) -> Result<(), DisassemblyError> {
    let header_size = GL_SHADER_RECORD.size();
    let attr_size = ATTR_ARRAY_RECORD.size();
    let end = desc.end.unwrap_or_else(|| desc.start.wrapping_add(header_size as Address));

    if desc.kind == BufferKind::GlShaderRecordExtended {
        log::warn!(
            "Extended GL shader record at {:08x} decoded with the base record layout",
            desc.start
        );
    }

    let region = map_record(ctx.memory, desc.start, end, header_size)?;
    let bytes = region.bytes();

    let record = GL_SHADER_RECORD.decode(&bytes[..header_size]);
    lines.push(Line::Decoded {
        addr: desc.start,
        text: record.to_string(),
    });

    for name in GL_CODE_FIELDS {
        if let Some(code_addr) = record.get(name) {
            ctx.worklist.push(BufferDescriptor::qpu_program(code_addr as Address));
        }
    }

    let attrs = &bytes[header_size..];
    if attrs.len() % attr_size != 0 {
        log::warn!(
            "GL shader record at {:08x} has {} trailing bytes after its attribute arrays",
            desc.start,
            attrs.len() % attr_size
        );
    }

    for (i, chunk) in attrs.chunks_exact(attr_size).enumerate() {
        lines.push(Line::Decoded {
            addr: desc.start.wrapping_add((header_size + i * attr_size) as Address),
            text: ATTR_ARRAY_RECORD.decode(chunk).to_string(),
        });
    }

    Ok(())
}

/// Disassemble an NV shader record.
pub fn run_nv(desc: &BufferDescriptor, ctx: &mut Context<'_>, lines: &mut Vec<Line>) -> Result<(), DisassemblyError> {
    let record_size = NV_SHADER_RECORD.size();
    let end = desc.end.unwrap_or_else(|| desc.start.wrapping_add(record_size as Address));

    let region = map_record(ctx.memory, desc.start, end, record_size)?;
    let record = NV_SHADER_RECORD.decode(&region.bytes()[..record_size]);

    lines.push(Line::Decoded {
        addr: desc.start,
        text: record.to_string(),
    });

    if let Some(code_addr) = record.get("fs_code_addr") {
        ctx.worklist.push(BufferDescriptor::qpu_program(code_addr as Address));
    }

    Ok(())
}
