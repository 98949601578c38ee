//! Listing renderers selected by `--format`

mod json;
mod csv;

use crate::{BufferKind, Disassembly, DisassemblyError};
use std::fmt::{self, Write as _};
use std::str::FromStr;
use clap::ValueEnum;

/// How a finished disassembly is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Per-buffer headed listings, as printed by the dump tool
    #[default]
    Text,
    /// One pretty-printed document holding every buffer
    Json,
    /// A buffer object followed by one object per line
    #[value(name = "jsonl", alias = "json-lines")]
    JsonLines,
    /// One row per listing line or buffer failure
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.to_possible_value().map(|v| v.get_name().to_string());
        write!(f, "{}", name.unwrap_or_default())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true).map_err(|_| format!("Unknown output format: {}", s))
    }
}

impl OutputFormat {
    /// Renderer for this format
    pub fn get_formatter(&self) -> Box<dyn DisassemblyFormatter> {
        match self {
            Self::Text => Box::new(TextFormatter),
            Self::Json => Box::new(JsonFormatter),
            Self::JsonLines => Box::new(JsonLinesFormatter),
            Self::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Renders a `Disassembly` into a string.
pub trait DisassemblyFormatter {
    fn format(&self, disassembly: &Disassembly) -> Result<String, DisassemblyError>;
}

/// Headed listings
pub struct TextFormatter;

/// Hierarchical JSON
pub struct JsonFormatter;

/// JSON Lines
pub struct JsonLinesFormatter;

/// CSV rows
pub struct CsvFormatter;

/// Stable machine-readable name of a buffer kind
pub fn kind_tag(kind: BufferKind) -> &'static str {
    match kind {
        BufferKind::Cl => "cl",
        BufferKind::GlShaderRecord => "gl_shader_record",
        BufferKind::GlShaderRecordExtended => "gl_shader_record_extended",
        BufferKind::QpuProgram => "qpu_program",
        BufferKind::NvShaderRecord => "nv_shader_record",
    }
}

fn text_error(e: fmt::Error) -> DisassemblyError {
    DisassemblyError::Generic(format!("Text formatting error: {}", e))
}

fn text_heading(kind: BufferKind) -> &'static str {
    match kind {
        BufferKind::Cl => "CL buffer addr",
        BufferKind::GlShaderRecord => "GL Shader Record Addr",
        BufferKind::GlShaderRecordExtended => "GL Shader Record (extended) Addr",
        BufferKind::QpuProgram => "QPU Program Addr",
        BufferKind::NvShaderRecord => "NV Shader Record Addr",
    }
}

impl DisassemblyFormatter for TextFormatter {
    fn format(&self, disassembly: &Disassembly) -> Result<String, DisassemblyError> {
        let mut text = String::new();

        for listing in &disassembly.listings {
            let heading = format!(
                "{}: {:08x}",
                text_heading(listing.descriptor.kind),
                listing.descriptor.start
            );
            writeln!(text, "{}\n{}", heading, "-".repeat(heading.len())).map_err(text_error)?;

            for line in &listing.lines {
                writeln!(text, "{}", line).map_err(text_error)?;
            }

            if let Some(error) = &listing.error {
                writeln!(text, "!! {}", error).map_err(text_error)?;
            }

            text.push('\n');
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferDescriptor, BufferListing, Line};

    pub(crate) fn create_test_disassembly() -> Disassembly {
        let mut cl = BufferListing::new(BufferDescriptor::control_list(0x1000, None));
        cl.lines.push(Line::Decoded { addr: 0x1000, text: "NV_SHADER shader_record_addr=0x2000".to_string() });
        cl.lines.push(Line::Invalid { addr: 0x1005, byte: 2 });
        cl.lines.push(Line::Decoded { addr: 0x1006, text: "HALT".to_string() });

        let mut nv = BufferListing::new(BufferDescriptor::new(BufferKind::NvShaderRecord, 0x2000, Some(0x2010)));
        nv.error = Some("Failed to map 16 bytes at 00002000: denied".to_string());

        Disassembly { listings: vec![cl, nv] }
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSONL".parse::<OutputFormat>().unwrap(), OutputFormat::JsonLines);
        assert!("xml".parse::<OutputFormat>().is_err());

        assert_eq!(OutputFormat::JsonLines.to_string(), "jsonl");
        for format in OutputFormat::value_variants() {
            assert_eq!(format.to_string().parse::<OutputFormat>().unwrap(), *format);
        }
    }

    #[test]
    fn test_text_formatter() {
        let result = TextFormatter.format(&create_test_disassembly()).unwrap();

        assert!(result.starts_with("CL buffer addr: 00001000\n------------------------\n"));
        assert!(result.contains("00001000: NV_SHADER shader_record_addr=0x2000\n"));
        assert!(result.contains("00001005: INVALID OPCODE (2)\n"));
        assert!(result.contains("NV Shader Record Addr: 00002000\n"));
        assert!(result.contains("!! Failed to map 16 bytes at 00002000: denied\n"));
    }

    #[test]
    fn test_empty_disassembly() {
        let empty = Disassembly::default();
        for format in [OutputFormat::Text, OutputFormat::JsonLines] {
            assert_eq!(format.get_formatter().format(&empty).unwrap(), "");
        }
        // Every formatter is reachable through its format
        for format in OutputFormat::value_variants() {
            assert!(format.get_formatter().format(&empty).is_ok(), "{} failed", format);
        }
    }
}
