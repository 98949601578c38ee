//! Cross-reference extraction: which buffers a decoded instruction points at.

use std::fmt;
use clap::ValueEnum;

use crate::decoder::{unpack_fields, Opcode};
use crate::strategy::shader_record::{ATTR_ARRAY_RECORD, GL_SHADER_RECORD, NV_SHADER_RECORD};
use crate::{Address, BufferDescriptor, BufferKind, ClInsn};

/// How a GL_SHADER instruction's references are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ShaderRecordPolicy {
    /// GL_SHADER yields only its GL shader record
    #[default]
    Exclusive,
    /// GL_SHADER also yields an NV shader record, reading the same bytes as
    /// an NV_SHADER instruction. Matches listings produced by older dump
    /// tools that did not separate the two cases.
    LegacyFallthrough,
}

impl fmt::Display for ShaderRecordPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderRecordPolicy::Exclusive => write!(f, "exclusive"),
            ShaderRecordPolicy::LegacyFallthrough => write!(f, "legacy-fallthrough"),
        }
    }
}

/// Buffers referenced by `insn`.
///
/// `current_end` is the end of the control list being walked; a BRANCH
/// continues that same list, so its target inherits it.
pub fn references(
    insn: &ClInsn,
    current_end: Option<Address>,
    policy: ShaderRecordPolicy,
) -> Vec<BufferDescriptor> {
    let mut found = Vec::new();

    match insn.opcode {
        Opcode::BranchSub => {
            // Sub-lists end at their own RETURN
            if let Some(target) = insn.branch_target() {
                found.push(BufferDescriptor::control_list(target, None));
            }
        }
        Opcode::Branch => {
            if let Some(target) = insn.branch_target() {
                found.push(BufferDescriptor::control_list(target, current_end));
            }
        }
        Opcode::GlShader => {
            found.extend(gl_shader_record(insn));
            if policy == ShaderRecordPolicy::LegacyFallthrough {
                found.extend(legacy_nv_record(insn));
            }
        }
        Opcode::NvShader => found.extend(nv_shader_record(insn)),
        _ => {}
    }

    for desc in &found {
        log::debug!("Adding disassembly buffer {}", desc);
    }

    found
}

fn gl_shader_record(insn: &ClInsn) -> Option<BufferDescriptor> {
    let addr = insn.shader_record_addr()? << 4;
    let size = GL_SHADER_RECORD.size() + ATTR_ARRAY_RECORD.size() * insn.num_attr_arrays()? as usize;

    // Extended records get the base size too; see DESIGN.md
    let kind = if insn.extended_record()? {
        BufferKind::GlShaderRecordExtended
    } else {
        BufferKind::GlShaderRecord
    };

    Some(BufferDescriptor::new(kind, addr, Some(addr.wrapping_add(size as Address))))
}

fn nv_shader_record(insn: &ClInsn) -> Option<BufferDescriptor> {
    insn.shader_record_addr().map(nv_record_at)
}

/// The NV record a GL_SHADER's argument bytes name when read with the
/// NV_SHADER field layout.
fn legacy_nv_record(insn: &ClInsn) -> Option<BufferDescriptor> {
    let args = insn.bytes.get(1..)?;
    if args.len() + 1 < Opcode::NvShader.size() {
        return None;
    }

    let (_, addr) = unpack_fields(args, Opcode::NvShader.fields())
        .into_iter()
        .find(|(name, _)| *name == "shader_record_addr")?;
    Some(nv_record_at(addr as Address))
}

fn nv_record_at(addr: Address) -> BufferDescriptor {
    let end = addr.wrapping_add(NV_SHADER_RECORD.size() as Address);
    BufferDescriptor::new(BufferKind::NvShaderRecord, addr, Some(end))
}
