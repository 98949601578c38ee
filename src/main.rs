//! cl_dump: disassemble V3D control lists straight out of physical memory.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context as _, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};

use cl_dump::decoder::V3dDecoder;
use cl_dump::driver::{Disassembler, DisassemblerConfig};
use cl_dump::format::OutputFormat;
use cl_dump::memory::{DevMem, ImageMemory};
use cl_dump::strategy::xref::ShaderRecordPolicy;
use cl_dump::{dump, search, Address, BufferDescriptor, BufferKind, PhysicalMemory};

#[derive(Parser, Debug)]
#[command(name = "cl_dump", version, about = "V3D control list disassembler")]
struct Cli {
    /// Read memory from a raw image file instead of /dev/mem
    #[arg(long, global = true, value_name = "FILE")]
    image: Option<PathBuf>,

    /// Physical address of the first byte of --image
    #[arg(long, global = true, value_name = "HEX", default_value = "0x0", value_parser = cl_dump::parse_address)]
    image_base: Address,

    /// Output format for disassembly listings
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// How GL_SHADER instructions are followed
    #[arg(long, global = true, value_enum, default_value_t = ShaderRecordPolicy::Exclusive)]
    shader_policy: ShaderRecordPolicy,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Disassemble a buffer and everything it references
    Dis {
        /// First byte of the seed buffer
        #[arg(value_parser = cl_dump::parse_address)]
        start: Address,
        /// One past the last byte, 0x0 when unknown
        #[arg(value_parser = cl_dump::parse_address)]
        end: Address,
        /// What the seed buffer holds
        #[arg(long, value_enum, default_value_t = BufferKind::Cl)]
        kind: BufferKind,
    },
    /// Copy raw memory to a file
    Dump {
        /// First byte to copy
        #[arg(value_parser = cl_dump::parse_address)]
        addr: Address,
        /// Number of bytes, decimal
        #[arg(value_parser = cl_dump::parse_size)]
        size: usize,
        /// Destination file
        outfile: PathBuf,
    },
    /// Scan memory for the start of binning control lists
    Search {
        /// First byte to scan
        #[arg(value_parser = cl_dump::parse_address)]
        start: Address,
        /// Number of bytes, decimal
        #[arg(value_parser = cl_dump::parse_size)]
        size: usize,
    },
}

fn open_memory(cli: &Cli) -> Result<Box<dyn PhysicalMemory>> {
    match &cli.image {
        Some(path) => {
            let image = ImageMemory::from_file(cli.image_base, path)
                .with_context(|| format!("Could not load memory image {}", path.display()))?;
            log::info!("Using {} byte image at {:08x}", path.metadata().map(|m| m.len()).unwrap_or(0), cli.image_base);
            Ok(Box::new(image))
        }
        None => Ok(Box::new(DevMem::open()?)),
    }
}

fn run(cli: Cli) -> Result<()> {
    let memory = open_memory(&cli)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Dis { start, end, kind } => {
            let end = if end == 0 { None } else { Some(end) };
            let config = DisassemblerConfig {
                shader_policy: cli.shader_policy,
                ..DisassemblerConfig::default()
            };
            let decoder = V3dDecoder::new();
            let disassembler = Disassembler::new(memory.as_ref(), &decoder, config);

            let disassembly = disassembler.run(BufferDescriptor::new(kind, start, end));
            let rendered = cli.format.get_formatter().format(&disassembly)?;
            out.write_all(rendered.as_bytes())?;
        }
        Command::Dump { addr, size, outfile } => {
            dump::dump_to_file(memory.as_ref(), addr, size, &outfile)
                .with_context(|| format!("Dump to {} failed", outfile.display()))?;
        }
        Command::Search { start, size } => {
            let found = search::search(memory.as_ref(), start, size)?;
            if found.is_empty() {
                writeln!(out, "No bin lists found")?;
            }
            for addr in found {
                writeln!(out, "Found a bin list beginning at {:x}", addr)?;
            }
        }
    }

    out.flush()?;
    Ok(())
}

/// Exit status for a command line that did not parse into a `Cli`
fn parse_exit_code(e: &clap::Error) -> i32 {
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = parse_exit_code(&e);
            let _ = e.print();
            process::exit(code);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse_error(args: &[&str]) -> clap::Error {
        match Cli::try_parse_from(args) {
            Ok(cli) => panic!("Expected a parse error, got {:?}", cli),
            Err(e) => e,
        }
    }

    #[test]
    fn test_malformed_literals_exit_one() {
        let cases: [&[&str]; 5] = [
            &["cl_dump", "dis", "zz", "0x0"],
            &["cl_dump", "dis", "1000", "0x0"],
            &["cl_dump", "dump", "0x1000", "0x20", "out.bin"],
            &["cl_dump", "search", "0x1000"],
            &["cl_dump", "--format", "xml", "dis", "0x1000", "0x0"],
        ];
        for args in cases {
            assert_eq!(parse_exit_code(&parse_error(args)), 1, "{:?}", args);
        }
    }

    #[test]
    fn test_help_exits_zero() {
        assert_eq!(parse_exit_code(&parse_error(&["cl_dump", "--help"])), 0);
        assert_eq!(parse_exit_code(&parse_error(&["cl_dump", "dis", "--help"])), 0);
    }

    #[test]
    fn test_dis_arguments() {
        let cli = Cli::try_parse_from([
            "cl_dump", "--format", "jsonl", "dis", "0x1000", "0x0", "--kind", "qpu-program",
        ])
        .unwrap();

        assert_eq!(cli.format, OutputFormat::JsonLines);
        assert_eq!(cli.shader_policy, ShaderRecordPolicy::Exclusive);
        match cli.command {
            Command::Dis { start, end, kind } => {
                assert_eq!((start, end, kind), (0x1000, 0, BufferKind::QpuProgram));
            }
            other => panic!("Expected dis, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_buffer_is_not_a_failed_run() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("mem.bin");
        std::fs::write(&image, [0u8; 16]).unwrap();
        let image = image.to_str().unwrap();

        // Seed lies below the image, so its only buffer fails to map
        let cli = Cli::try_parse_from([
            "cl_dump", "--image", image, "--image-base", "0x1000", "dis", "0x10", "0x0",
        ])
        .unwrap();
        assert!(run(cli).is_ok());

        let cli = Cli::try_parse_from(["cl_dump", "--image", image, "--image-base", "0x1000", "search", "0x1000", "16"])
            .unwrap();
        assert!(run(cli).is_ok());
    }

    #[test]
    fn test_missing_image_fails_run() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.bin");

        let cli = Cli::try_parse_from(["cl_dump", "--image", missing.to_str().unwrap(), "dis", "0x0", "0x0"]).unwrap();
        assert!(run(cli).is_err());
    }
}
