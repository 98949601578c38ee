//! QPU program disassembly and program-end discovery.

use crate::strategy::Context;
use crate::{Address, BufferDescriptor, DisassemblyError, Line, PhysicalMemory};

/// Bytes per QPU instruction
pub const QPU_INSN_SIZE: usize = 8;

/// Signal value marking the end of a program
pub const PROGRAM_END_SIGNAL: u8 = 0x3;

/// Instructions executed after the program end signal
pub const END_DELAY_SLOTS: usize = 2;

/// The signalling field, bits 63..60 of an instruction
pub fn signal(word: u64) -> u8 {
    (word >> 60) as u8
}

/// Human-readable name of a signal value
pub fn signal_name(sig: u8) -> &'static str {
    match sig & 0xf {
        0 => "breakpoint",
        1 => "no signal",
        2 => "thread switch",
        3 => "program end",
        4 => "wait for scoreboard",
        5 => "scoreboard unlock",
        6 => "last thread switch",
        7 => "coverage load",
        8 => "colour load",
        9 => "colour load and program end",
        10 => "load tmu0",
        11 => "load tmu1",
        12 => "alpha-mask load",
        13 => "small immediate",
        14 => "load immediate",
        _ => "branch",
    }
}

fn word(chunk: &[u8]) -> u64 {
    let mut raw = [0u8; QPU_INSN_SIZE];
    raw.copy_from_slice(chunk);
    u64::from_le_bytes(raw)
}

/// Index of the first instruction carrying the program end signal
pub fn find_end_signal(bytes: &[u8]) -> Option<usize> {
    bytes
        .chunks_exact(QPU_INSN_SIZE)
        .position(|chunk| signal(word(chunk)) == PROGRAM_END_SIGNAL)
}

/// Find a program's length in instructions by scanning for its end signal.
///
/// The search window starts at `initial_size` bytes and doubles, rescanning
/// from `start` each time, until the signal is found or the window would
/// pass `max_size`.
pub fn program_length(
    memory: &dyn PhysicalMemory,
    start: Address,
    initial_size: usize,
    max_size: usize,
) -> Result<usize, DisassemblyError> {
    let mut search_size = initial_size.max(QPU_INSN_SIZE);
    let mut searched = 0;

    while search_size <= max_size {
        let region = memory.map(start, search_size)?;
        if let Some(index) = find_end_signal(region.bytes()) {
            return Ok(index + 1 + END_DELAY_SLOTS);
        }

        searched = search_size;
        search_size *= 2;
        log::debug!("No program end within {} bytes of {:08x}, retrying with {}", searched, start, search_size);
    }

    Err(DisassemblyError::QpuEndNotFound { start, searched })
}

/// Print `halfword_count / 2` instructions from `bytes`, one line each.
pub fn print_program(base: Address, bytes: &[u8], halfword_count: usize) -> Vec<Line> {
    bytes
        .chunks_exact(QPU_INSN_SIZE)
        .take(halfword_count / 2)
        .enumerate()
        .map(|(i, chunk)| {
            let insn = word(chunk);
            Line::Decoded {
                addr: base.wrapping_add((i * QPU_INSN_SIZE) as Address),
                text: format!("{:016x}  {}", insn, signal_name(signal(insn))),
            }
        })
        .collect()
}

/// Disassemble a QPU program, discovering its length when the end is unknown.
pub fn run(desc: &BufferDescriptor, ctx: &mut Context<'_>, lines: &mut Vec<Line>) -> Result<(), DisassemblyError> {
    let insn_count = match desc.end {
        Some(end) if end < desc.start => {
            return Err(DisassemblyError::InvalidRange { start: desc.start, end });
        }
        Some(end) => (end - desc.start) as usize / QPU_INSN_SIZE,
        None => program_length(
            ctx.memory,
            desc.start,
            ctx.config.initial_qpu_search_size,
            ctx.config.max_qpu_search_size,
        )?,
    };

    if insn_count == 0 {
        return Ok(());
    }

    // The delay slots may lie past the search window, so map the program alone
    let region = ctx.memory.map(desc.start, insn_count * QPU_INSN_SIZE)?;
    lines.extend(print_program(desc.start, region.bytes(), insn_count * 2));

    Ok(())
}
