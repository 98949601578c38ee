//! Table-driven decoder for the V3D control list instruction set.
//!
//! Every instruction is one opcode byte followed by its argument fields,
//! bit-packed least significant bit first with no padding between fields.
//! The same packing is used by shader records, so the field helpers here are
//! shared with the record disassemblers.

use std::fmt;

use crate::{ClDecoder, ClInsn, Decoded};

/// One bit-packed field of an instruction or record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Field name as printed in listings
    pub name: &'static str,
    /// Width in bits (at most 32)
    pub bits: u32,
}

/// Padding fields are packed but never printed
const UNUSED_PREFIX: &str = "unused";

/// Control list opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Halt = 0,
    Nop = 1,
    Flush = 4,
    FlushAllState = 5,
    StartTileBinning = 6,
    IncrSemaphore = 7,
    WaitSemaphore = 8,
    Branch = 16,
    BranchSub = 17,
    Return = 18,
    StoreSubsample = 24,
    StoreSubsampleEof = 25,
    StoreFull = 26,
    LoadFull = 27,
    StoreGeneral = 28,
    LoadGeneral = 29,
    IndexedPrimList = 32,
    VertexPrimList = 33,
    VgCoordList = 41,
    VgInlineList = 42,
    CompressedPrimList = 48,
    ClippedPrim = 49,
    PrimitiveListFormat = 56,
    GlShader = 64,
    NvShader = 65,
    VgShader = 66,
    InlineVgShader = 67,
    StateCfg = 96,
    StateFlatshade = 97,
    StatePointSize = 98,
    StateLineWidth = 99,
    StateRhtx = 100,
    StateDepthOffset = 101,
    StateClipWindow = 102,
    StateViewportOffset = 103,
    StateClipz = 104,
    StateClipperXy = 105,
    StateClipperZ = 106,
    StateTileBinningMode = 112,
    StateTileRenderingMode = 113,
    StateClearcol = 114,
    StateTileCoords = 115,
}

impl Opcode {
    /// Every opcode, in encoding order
    pub const ALL: &'static [Opcode] = &[
        Opcode::Halt,
        Opcode::Nop,
        Opcode::Flush,
        Opcode::FlushAllState,
        Opcode::StartTileBinning,
        Opcode::IncrSemaphore,
        Opcode::WaitSemaphore,
        Opcode::Branch,
        Opcode::BranchSub,
        Opcode::Return,
        Opcode::StoreSubsample,
        Opcode::StoreSubsampleEof,
        Opcode::StoreFull,
        Opcode::LoadFull,
        Opcode::StoreGeneral,
        Opcode::LoadGeneral,
        Opcode::IndexedPrimList,
        Opcode::VertexPrimList,
        Opcode::VgCoordList,
        Opcode::VgInlineList,
        Opcode::CompressedPrimList,
        Opcode::ClippedPrim,
        Opcode::PrimitiveListFormat,
        Opcode::GlShader,
        Opcode::NvShader,
        Opcode::VgShader,
        Opcode::InlineVgShader,
        Opcode::StateCfg,
        Opcode::StateFlatshade,
        Opcode::StatePointSize,
        Opcode::StateLineWidth,
        Opcode::StateRhtx,
        Opcode::StateDepthOffset,
        Opcode::StateClipWindow,
        Opcode::StateViewportOffset,
        Opcode::StateClipz,
        Opcode::StateClipperXy,
        Opcode::StateClipperZ,
        Opcode::StateTileBinningMode,
        Opcode::StateTileRenderingMode,
        Opcode::StateClearcol,
        Opcode::StateTileCoords,
    ];

    /// Look up the opcode encoded by `byte`
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Self::ALL.iter().copied().find(|op| op.byte() == byte)
    }

    /// The encoded opcode byte
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Mnemonic as printed in listings
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Halt => "HALT",
            Opcode::Nop => "NOP",
            Opcode::Flush => "FLUSH",
            Opcode::FlushAllState => "FLUSH_ALL_STATE",
            Opcode::StartTileBinning => "START_TILE_BINNING",
            Opcode::IncrSemaphore => "INCR_SEMAPHORE",
            Opcode::WaitSemaphore => "WAIT_SEMAPHORE",
            Opcode::Branch => "BRANCH",
            Opcode::BranchSub => "BRANCH_SUB",
            Opcode::Return => "RETURN",
            Opcode::StoreSubsample => "STORE_SUBSAMPLE",
            Opcode::StoreSubsampleEof => "STORE_SUBSAMPLE_EOF",
            Opcode::StoreFull => "STORE_FULL",
            Opcode::LoadFull => "LOAD_FULL",
            Opcode::StoreGeneral => "STORE_GENERAL",
            Opcode::LoadGeneral => "LOAD_GENERAL",
            Opcode::IndexedPrimList => "INDEXED_PRIM_LIST",
            Opcode::VertexPrimList => "VERTEX_PRIM_LIST",
            Opcode::VgCoordList => "VG_COORD_LIST",
            Opcode::VgInlineList => "VG_INLINE_LIST",
            Opcode::CompressedPrimList => "COMPRESSED_PRIM_LIST",
            Opcode::ClippedPrim => "CLIPPED_PRIM",
            Opcode::PrimitiveListFormat => "PRIMITIVE_LIST_FORMAT",
            Opcode::GlShader => "GL_SHADER",
            Opcode::NvShader => "NV_SHADER",
            Opcode::VgShader => "VG_SHADER",
            Opcode::InlineVgShader => "INLINE_VG_SHADER",
            Opcode::StateCfg => "STATE_CFG",
            Opcode::StateFlatshade => "STATE_FLATSHADE",
            Opcode::StatePointSize => "STATE_POINT_SIZE",
            Opcode::StateLineWidth => "STATE_LINE_WIDTH",
            Opcode::StateRhtx => "STATE_RHTX",
            Opcode::StateDepthOffset => "STATE_DEPTH_OFFSET",
            Opcode::StateClipWindow => "STATE_CLIP_WINDOW",
            Opcode::StateViewportOffset => "STATE_VIEWPORT_OFFSET",
            Opcode::StateClipz => "STATE_CLIPZ",
            Opcode::StateClipperXy => "STATE_CLIPPER_XY",
            Opcode::StateClipperZ => "STATE_CLIPPER_Z",
            Opcode::StateTileBinningMode => "STATE_TILE_BINNING_MODE",
            Opcode::StateTileRenderingMode => "STATE_TILE_RENDERING_MODE",
            Opcode::StateClearcol => "STATE_CLEARCOL",
            Opcode::StateTileCoords => "STATE_TILE_COORDS",
        }
    }

    /// Argument fields following the opcode byte
    pub fn fields(self) -> &'static [Field] {
        match self {
            Opcode::Halt
            | Opcode::Nop
            | Opcode::Flush
            | Opcode::FlushAllState
            | Opcode::StartTileBinning
            | Opcode::IncrSemaphore
            | Opcode::WaitSemaphore
            | Opcode::Return
            | Opcode::StoreSubsample
            | Opcode::StoreSubsampleEof => &[],
            Opcode::Branch | Opcode::BranchSub => &[Field { name: "branch_addr", bits: 32 }],
            Opcode::StoreFull => &[
                Field { name: "disable_colour_write", bits: 1 },
                Field { name: "disable_z_write", bits: 1 },
                Field { name: "disable_clear_on_write", bits: 1 },
                Field { name: "last_tile", bits: 1 },
                Field { name: "tile_addr", bits: 28 },
            ],
            Opcode::LoadFull => &[
                Field { name: "disable_colour_read", bits: 1 },
                Field { name: "disable_z_read", bits: 1 },
                Field { name: "unused", bits: 2 },
                Field { name: "tile_addr", bits: 28 },
            ],
            Opcode::StoreGeneral => &[
                Field { name: "buffer", bits: 3 },
                Field { name: "unused0", bits: 1 },
                Field { name: "format", bits: 2 },
                Field { name: "mode", bits: 2 },
                Field { name: "pixel_colour_format", bits: 2 },
                Field { name: "unused1", bits: 2 },
                Field { name: "disable_double_buf_swap", bits: 1 },
                Field { name: "disable_colour_clear", bits: 1 },
                Field { name: "disable_z_clear", bits: 1 },
                Field { name: "disable_vg_clear", bits: 1 },
                Field { name: "disable_colour_dump", bits: 1 },
                Field { name: "disable_z_dump", bits: 1 },
                Field { name: "disable_vg_dump", bits: 1 },
                Field { name: "last_tile", bits: 1 },
                Field { name: "frame_addr", bits: 28 },
            ],
            Opcode::LoadGeneral => &[
                Field { name: "buffer", bits: 3 },
                Field { name: "unused0", bits: 1 },
                Field { name: "format", bits: 2 },
                Field { name: "unused1", bits: 2 },
                Field { name: "pixel_colour_format", bits: 2 },
                Field { name: "unused2", bits: 2 },
                Field { name: "disable_colour_load", bits: 1 },
                Field { name: "disable_z_load", bits: 1 },
                Field { name: "disable_vg_load", bits: 1 },
                Field { name: "unused3", bits: 1 },
                Field { name: "frame_addr", bits: 28 },
            ],
            Opcode::IndexedPrimList => &[
                Field { name: "prim_mode", bits: 4 },
                Field { name: "index_type", bits: 4 },
                Field { name: "length", bits: 32 },
                Field { name: "indices_addr", bits: 32 },
                Field { name: "maximum_index", bits: 32 },
            ],
            Opcode::VertexPrimList => &[
                Field { name: "prim_mode", bits: 8 },
                Field { name: "length", bits: 32 },
                Field { name: "vertices_addr", bits: 32 },
            ],
            Opcode::VgCoordList => &[
                Field { name: "prim_mode", bits: 4 },
                Field { name: "continuation_list", bits: 4 },
                Field { name: "length", bits: 32 },
                Field { name: "coord_addr", bits: 32 },
            ],
            Opcode::VgInlineList => &[
                Field { name: "prim_mode", bits: 4 },
                Field { name: "continuation_list", bits: 4 },
                Field { name: "coord_list", bits: 32 },
            ],
            Opcode::CompressedPrimList => &[Field { name: "data", bits: 8 }],
            Opcode::ClippedPrim => &[
                Field { name: "clip_flags", bits: 3 },
                Field { name: "clip_addr_addr", bits: 29 },
                Field { name: "data", bits: 8 },
            ],
            Opcode::PrimitiveListFormat => &[
                Field { name: "prim_type", bits: 4 },
                Field { name: "data_type", bits: 4 },
            ],
            Opcode::GlShader => &[
                Field { name: "num_attr_arrays", bits: 3 },
                Field { name: "extended_record", bits: 1 },
                Field { name: "shader_record_addr", bits: 28 },
            ],
            Opcode::NvShader | Opcode::VgShader => &[Field { name: "shader_record_addr", bits: 32 }],
            Opcode::InlineVgShader => &[
                Field { name: "threading", bits: 3 },
                Field { name: "fragment_shader_code_addr", bits: 29 },
                Field { name: "fragment_shader_uniforms_addr", bits: 32 },
            ],
            Opcode::StateCfg => &[
                Field { name: "enable_forward_face", bits: 1 },
                Field { name: "enable_rear_face", bits: 1 },
                Field { name: "clockwise_prims", bits: 1 },
                Field { name: "enable_depth_offset", bits: 1 },
                Field { name: "aa_lines", bits: 1 },
                Field { name: "cov_read_type", bits: 1 },
                Field { name: "rast_oversample_mode", bits: 2 },
                Field { name: "cov_pipe_select", bits: 1 },
                Field { name: "cov_update_mode", bits: 2 },
                Field { name: "cov_read_mode", bits: 1 },
                Field { name: "depth_test_func", bits: 3 },
                Field { name: "z_update_enable", bits: 1 },
                Field { name: "early_z_enable", bits: 1 },
                Field { name: "early_z_update_enable", bits: 1 },
                Field { name: "unused", bits: 6 },
            ],
            Opcode::StateFlatshade => &[Field { name: "flatshade_flags", bits: 32 }],
            Opcode::StatePointSize => &[Field { name: "point_size", bits: 32 }],
            Opcode::StateLineWidth => &[Field { name: "line_width", bits: 32 }],
            Opcode::StateRhtx => &[Field { name: "rht_primitive_x", bits: 16 }],
            Opcode::StateDepthOffset => &[
                Field { name: "depth_offset_factor", bits: 16 },
                Field { name: "depth_offset_units", bits: 16 },
            ],
            Opcode::StateClipWindow => &[
                Field { name: "left", bits: 16 },
                Field { name: "bottom", bits: 16 },
                Field { name: "width", bits: 16 },
                Field { name: "height", bits: 16 },
            ],
            Opcode::StateViewportOffset => &[
                Field { name: "viewport_x", bits: 16 },
                Field { name: "viewport_y", bits: 16 },
            ],
            Opcode::StateClipz => &[
                Field { name: "min_z", bits: 32 },
                Field { name: "max_z", bits: 32 },
            ],
            Opcode::StateClipperXy => &[
                Field { name: "viewport_half_width", bits: 32 },
                Field { name: "viewport_half_height", bits: 32 },
            ],
            Opcode::StateClipperZ => &[
                Field { name: "viewport_z_scale", bits: 32 },
                Field { name: "viewport_z_offset", bits: 32 },
            ],
            Opcode::StateTileBinningMode => &[
                Field { name: "tile_mem_addr", bits: 32 },
                Field { name: "tile_mem_size", bits: 32 },
                Field { name: "tile_state_addr", bits: 32 },
                Field { name: "w_in_tiles", bits: 8 },
                Field { name: "h_in_tiles", bits: 8 },
                Field { name: "multisample", bits: 1 },
                Field { name: "colour_64", bits: 1 },
                Field { name: "auto_init_tile_state", bits: 1 },
                Field { name: "tile_initial_block_size", bits: 2 },
                Field { name: "tile_block_size", bits: 2 },
                Field { name: "double_buffer", bits: 1 },
            ],
            Opcode::StateTileRenderingMode => &[
                Field { name: "framebuffer_address", bits: 32 },
                Field { name: "width", bits: 16 },
                Field { name: "height", bits: 16 },
                Field { name: "multisample", bits: 1 },
                Field { name: "colour_64", bits: 1 },
                Field { name: "colour_format", bits: 2 },
                Field { name: "decimate_mode", bits: 2 },
                Field { name: "memory_format", bits: 2 },
                Field { name: "enable_vg_mask", bits: 1 },
                Field { name: "coverage_mode", bits: 1 },
                Field { name: "early_z_update_dir", bits: 1 },
                Field { name: "early_z_disable", bits: 1 },
                Field { name: "double_buffer", bits: 1 },
                Field { name: "unused", bits: 3 },
            ],
            Opcode::StateClearcol => &[
                Field { name: "clear_colour0", bits: 32 },
                Field { name: "clear_colour1", bits: 32 },
                Field { name: "clear_z", bits: 24 },
                Field { name: "clear_vg_mask", bits: 8 },
                Field { name: "clear_stencil", bits: 8 },
            ],
            Opcode::StateTileCoords => &[
                Field { name: "column", bits: 8 },
                Field { name: "row", bits: 8 },
            ],
        }
    }

    /// Encoded size in bytes, opcode included
    pub fn size(self) -> usize {
        1 + packed_size(self.fields())
    }

    /// HALT, BRANCH and RETURN end a control list in line. BRANCH_SUB does
    /// not: the sub-list returns to the instruction after it.
    pub fn is_terminal(self) -> bool {
        matches!(self, Opcode::Halt | Opcode::Branch | Opcode::Return)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Bytes needed to hold `fields` bit-packed back to back
pub fn packed_size(fields: &[Field]) -> usize {
    let bits: u32 = fields.iter().map(|f| f.bits).sum();
    bits.div_ceil(8) as usize
}

/// Read `width` bits starting at bit `offset`, least significant bit first.
///
/// Bits past the end of `bytes` read as zero.
pub fn read_bits(bytes: &[u8], offset: usize, width: u32) -> u64 {
    let mut value = 0u64;
    for i in 0..width as usize {
        let bit = offset + i;
        let byte = bytes.get(bit / 8).copied().unwrap_or(0);
        value |= (((byte >> (bit % 8)) & 1) as u64) << i;
    }
    value
}

/// Unpack `fields` from `bytes`, skipping padding fields.
pub fn unpack_fields(bytes: &[u8], fields: &[Field]) -> Vec<(&'static str, u64)> {
    let mut offset = 0;
    let mut values = Vec::with_capacity(fields.len());
    for field in fields {
        if !field.name.starts_with(UNUSED_PREFIX) {
            values.push((field.name, read_bits(bytes, offset, field.bits)));
        }
        offset += field.bits as usize;
    }
    values
}

/// Decoder for the V3D control list instruction set.
#[derive(Debug, Clone, Copy, Default)]
pub struct V3dDecoder;

impl V3dDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        V3dDecoder
    }

    /// Decode `bytes` as if it held an instruction with `opcode`, whatever
    /// its actual opcode byte says.
    pub fn decode_as(&self, opcode: Opcode, bytes: &[u8]) -> Option<ClInsn> {
        let size = opcode.size();
        if bytes.len() < size {
            return None;
        }

        Some(ClInsn {
            opcode,
            bytes: bytes[..size].to_vec(),
            fields: unpack_fields(&bytes[1..size], opcode.fields()),
        })
    }
}

impl ClDecoder for V3dDecoder {
    fn insn_len(&self, bytes: &[u8]) -> Option<usize> {
        let opcode = Opcode::from_byte(*bytes.first()?)?;
        Some(opcode.size())
    }

    fn decode(&self, bytes: &[u8]) -> Decoded {
        let byte = match bytes.first() {
            Some(b) => *b,
            None => return Decoded::Invalid { byte: 0 },
        };

        match Opcode::from_byte(byte).and_then(|op| self.decode_as(op, bytes)) {
            Some(insn) => Decoded::Insn(insn),
            None => Decoded::Invalid { byte },
        }
    }
}
