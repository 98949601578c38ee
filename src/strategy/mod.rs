//! Per-kind buffer disassembly strategies

use crate::driver::{DisassemblerConfig, Worklist};
use crate::{BufferDescriptor, BufferKind, ClDecoder, DisassemblyError, Line, PhysicalMemory};

pub mod window;
pub mod control_list;
pub mod xref;
pub mod shader_record;
pub mod qpu;

/// Shared state handed to every buffer disassembler.
///
/// Disassemblers append the buffers they discover to `worklist`.
pub struct Context<'a> {
    pub memory: &'a dyn PhysicalMemory,
    pub decoder: &'a dyn ClDecoder,
    pub config: &'a DisassemblerConfig,
    pub worklist: &'a mut Worklist,
}

/// Run the strategy matching `desc.kind`, appending output to `lines`.
///
/// Lines emitted before an error are left in place.
pub fn run(desc: &BufferDescriptor, ctx: &mut Context<'_>, lines: &mut Vec<Line>) -> Result<(), DisassemblyError> {
    match desc.kind {
        BufferKind::Cl => control_list::run(desc, ctx, lines),
        BufferKind::GlShaderRecord | BufferKind::GlShaderRecordExtended => shader_record::run_gl(desc, ctx, lines),
        BufferKind::NvShaderRecord => shader_record::run_nv(desc, ctx, lines),
        BufferKind::QpuProgram => qpu::run(desc, ctx, lines),
    }
}
