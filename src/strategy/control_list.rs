//! Control list walking over a growing window.

use crate::strategy::window::DisassemblyWindow;
use crate::strategy::{xref, Context};
use crate::{BufferDescriptor, ClDecoder, Decoded, DisassemblyError, Line};

/// Walk one control list.
///
/// Without a known end the list runs until HALT, BRANCH or RETURN. Every
/// decoded instruction is checked for references, which are pushed onto the
/// worklist rather than followed in line.
pub fn run(desc: &BufferDescriptor, ctx: &mut Context<'_>, lines: &mut Vec<Line>) -> Result<(), DisassemblyError> {
    let mut window = DisassemblyWindow::new(
        ctx.memory,
        desc.start,
        desc.end,
        ctx.config.initial_window_size,
        ctx.config.max_cl_size,
    );

    window.grow()?;

    while !window.at_end() {
        while window.cursor() >= window.mapped_len() {
            window.grow()?;
        }

        // Invalid opcodes resynchronise one byte later
        let mut len = step_len(ctx.decoder, &window);
        while window.cursor() + len > window.mapped_len() {
            window.grow()?;
            len = step_len(ctx.decoder, &window);
        }

        let addr = window.cursor_address();
        match ctx.decoder.decode(window.bytes_at_cursor()) {
            Decoded::Insn(insn) => {
                lines.push(Line::Decoded { addr, text: insn.to_string() });

                for found in xref::references(&insn, desc.end, ctx.config.shader_policy) {
                    ctx.worklist.push(found);
                }

                if insn.is_terminal() {
                    return Ok(());
                }
            }
            Decoded::Invalid { byte } => lines.push(Line::Invalid { addr, byte }),
        }

        window.advance(len);
    }

    Ok(())
}

fn step_len(decoder: &dyn ClDecoder, window: &DisassemblyWindow<'_>) -> usize {
    decoder.insn_len(window.bytes_at_cursor()).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::V3dDecoder;
    use crate::driver::{DisassemblerConfig, Worklist};
    use crate::memory::ImageMemory;
    use crate::BufferKind;
    use rstest::rstest;

    const BASE: u32 = 0x1000_0000;

    fn walk(mem: &ImageMemory, desc: BufferDescriptor, config: DisassemblerConfig) -> (Result<(), DisassemblyError>, Vec<Line>, Worklist) {
        let decoder = V3dDecoder::new();
        let mut worklist = Worklist::new();
        let mut lines = Vec::new();
        let result = {
            let mut ctx = Context {
                memory: mem,
                decoder: &decoder,
                config: &config,
                worklist: &mut worklist,
            };
            run(&desc, &mut ctx, &mut lines)
        };
        (result, lines, worklist)
    }

    fn with_window(initial_window_size: usize) -> DisassemblerConfig {
        DisassemblerConfig {
            initial_window_size,
            ..DisassemblerConfig::default()
        }
    }

    /// NOP, STATE_CLIP_WINDOW, an invalid byte, STATE_TILE_BINNING_MODE,
    /// BRANCH_SUB, STATE_CLEARCOL, NOP, RETURN, then bytes that must never be read.
    fn sample_list() -> Vec<u8> {
        let mut cl = vec![1];
        cl.extend_from_slice(&[102, 0, 0, 0, 0, 0x40, 0x01, 0xf0, 0x00]);
        cl.push(3);
        cl.push(112);
        cl.extend_from_slice(&[0x11; 15]);
        cl.push(17);
        cl.extend_from_slice(&0x1000_2000u32.to_le_bytes());
        cl.push(114);
        cl.extend_from_slice(&[0x22; 13]);
        cl.push(1);
        cl.push(18);
        cl.extend_from_slice(&[16, 0, 0, 0, 0x30, 1, 1, 1]);
        cl
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(8)]
    #[case(64)]
    fn test_growth_is_transparent(#[case] initial: usize) {
        let cl = sample_list();
        let mem = ImageMemory::new(BASE, cl.clone());
        let (result, lines, worklist) = walk(&mem, BufferDescriptor::control_list(BASE, None), with_window(initial));

        // Pre-sized: the first grow already covers the whole list
        let presized_mem = ImageMemory::new(BASE, cl.clone());
        let presized = cl.len().next_power_of_two();
        let (presized_result, presized_lines, _) =
            walk(&presized_mem, BufferDescriptor::control_list(BASE, None), with_window(presized));

        result.unwrap();
        presized_result.unwrap();
        assert_eq!(lines, presized_lines);
        assert_eq!(presized_mem.requests().len(), 1);
        assert_eq!(worklist.len(), 1);
        assert_eq!(mem.live_mappings(), 0);
    }

    #[test]
    fn test_walk_lines() {
        let mem = ImageMemory::new(BASE, sample_list());
        let (result, lines, worklist) = walk(&mem, BufferDescriptor::control_list(BASE, None), DisassemblerConfig::default());

        result.unwrap();
        let addrs: Vec<_> = lines.iter().map(|l| l.addr() - BASE).collect();
        assert_eq!(addrs, vec![0, 1, 10, 11, 27, 32, 46, 47]);
        assert_eq!(lines[0].to_string(), "10000000: NOP");
        assert!(lines[1].to_string().contains("STATE_CLIP_WINDOW left=0x0 bottom=0x0 width=0x140 height=0xf0"));
        assert_eq!(lines[2], Line::Invalid { addr: BASE + 10, byte: 3 });
        assert_eq!(lines[7].to_string(), "1000002f: RETURN");

        let queued: Vec<_> = worklist.iter().copied().collect();
        assert_eq!(queued, vec![BufferDescriptor::control_list(0x1000_2000, None)]);
    }

    #[rstest]
    #[case(0)]
    #[case(16)]
    #[case(18)]
    fn test_terminal_stops_walk(#[case] terminal: u8) {
        let mut cl = vec![1, 1, terminal];
        if terminal == 16 {
            cl.extend_from_slice(&0x2000_0000u32.to_le_bytes());
        }
        // Would decode as NOPs if the walk continued
        cl.extend_from_slice(&[1; 32]);
        let mem = ImageMemory::new(BASE, cl);

        let (result, lines, _) = walk(&mem, BufferDescriptor::control_list(BASE, None), DisassemblerConfig::default());

        result.unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].addr(), BASE + 2);
    }

    #[test]
    fn test_branch_sub_does_not_stop_walk() {
        let mut cl = vec![17];
        cl.extend_from_slice(&0x1000_2000u32.to_le_bytes());
        cl.extend_from_slice(&[1, 0]);
        let mem = ImageMemory::new(BASE, cl);

        let (result, lines, worklist) = walk(&mem, BufferDescriptor::control_list(BASE, None), DisassemblerConfig::default());

        result.unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(worklist.len(), 1);
    }

    #[test]
    fn test_known_end_stops_walk() {
        let mem = ImageMemory::new(BASE, vec![1; 64]);
        let (result, lines, _) = walk(&mem, BufferDescriptor::control_list(BASE, Some(BASE + 5)), DisassemblerConfig::default());

        result.unwrap();
        assert_eq!(lines.len(), 5);
        assert_eq!(mem.live_mappings(), 0);
    }

    #[test]
    fn test_branch_carries_known_end() {
        let mut cl = vec![1, 16];
        cl.extend_from_slice(&0x2000_3000u32.to_le_bytes());
        let mem = ImageMemory::new(0x2000_0000, cl);

        let desc = BufferDescriptor::control_list(0x2000_0000, Some(0x2001_0000));
        let (result, _, worklist) = walk(&mem, desc, DisassemblerConfig::default());

        result.unwrap();
        let queued: Vec<_> = worklist.iter().copied().collect();
        assert_eq!(
            queued,
            vec![BufferDescriptor::new(BufferKind::Cl, 0x2000_3000, Some(0x2001_0000))]
        );
    }

    #[test]
    fn test_growth_cap() {
        let mem = ImageMemory::new(BASE, vec![1; 1024]);
        let config = DisassemblerConfig {
            max_cl_size: 64,
            ..DisassemblerConfig::default()
        };

        let (result, lines, _) = walk(&mem, BufferDescriptor::control_list(BASE, None), config);

        assert!(matches!(result, Err(DisassemblyError::GrowthCapExceeded { size: 128, cap: 64, .. })));
        // Everything inside the cap was still emitted
        assert_eq!(lines.len(), 64);
        assert_eq!(mem.largest_request(), 64);
        assert_eq!(mem.live_mappings(), 0);
    }

    #[test]
    fn test_unmappable_list() {
        let mem = ImageMemory::new(BASE, vec![1; 16]);
        let (result, lines, _) = walk(&mem, BufferDescriptor::control_list(0x100, None), DisassemblerConfig::default());

        assert!(matches!(result, Err(DisassemblyError::Mapping { addr: 0x100, size: 2, .. })));
        assert!(lines.is_empty());
    }

    #[test]
    fn test_instruction_straddling_window() {
        // STATE_TILE_BINNING_MODE is 16 bytes; the first window is only 2
        let mut cl = vec![112];
        cl.extend_from_slice(&[0; 15]);
        cl.push(0);
        let mem = ImageMemory::new(BASE, cl);

        let (result, lines, _) = walk(&mem, BufferDescriptor::control_list(BASE, None), DisassemblerConfig::default());

        result.unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].to_string().contains("STATE_TILE_BINNING_MODE"));
        assert_eq!(lines[1].to_string(), "10000010: HALT");
    }
}
