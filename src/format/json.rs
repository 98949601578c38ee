//! JSON and JSON Lines output formatters

use serde::{Serialize, Deserialize};
use serde_json::json;

use crate::{BufferListing, Disassembly, DisassemblyError, Line};
use super::{kind_tag, DisassemblyFormatter};

/// Serializable listing line for JSON output
#[derive(Serialize, Deserialize)]
struct LineJson {
    /// Physical address of the line
    address: String,
    /// Decoded text (absent for invalid opcodes)
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    /// Raw byte of an invalid opcode
    #[serde(skip_serializing_if = "Option::is_none")]
    invalid_opcode: Option<u8>,
}

/// Serializable buffer listing for JSON output
#[derive(Serialize, Deserialize)]
struct BufferJson {
    /// Buffer kind tag
    kind: String,
    /// Start address
    start: String,
    /// End address, null when unknown
    end: Option<String>,
    /// Lines emitted for the buffer
    lines: Vec<LineJson>,
    /// Failure message, if the buffer failed
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Serializable disassembly result for JSON output
#[derive(Serialize, Deserialize)]
struct DisassemblyJson {
    /// Buffers in dispatch order
    buffers: Vec<BufferJson>,
}

fn hex(addr: u32) -> String {
    format!("0x{:08x}", addr)
}

fn line_to_json(line: &Line) -> LineJson {
    match line {
        Line::Decoded { addr, text } => LineJson {
            address: hex(*addr),
            text: Some(text.clone()),
            invalid_opcode: None,
        },
        Line::Invalid { addr, byte } => LineJson {
            address: hex(*addr),
            text: None,
            invalid_opcode: Some(*byte),
        },
    }
}

fn listing_to_json(listing: &BufferListing) -> BufferJson {
    BufferJson {
        kind: kind_tag(listing.descriptor.kind).to_string(),
        start: hex(listing.descriptor.start),
        end: listing.descriptor.end.map(hex),
        lines: listing.lines.iter().map(line_to_json).collect(),
        error: listing.error.clone(),
    }
}

fn json_error(e: serde_json::Error) -> DisassemblyError {
    DisassemblyError::Generic(format!("JSON serialization error: {}", e))
}

impl DisassemblyFormatter for super::JsonFormatter {
    fn format(&self, disassembly: &Disassembly) -> Result<String, DisassemblyError> {
        let result = DisassemblyJson {
            buffers: disassembly.listings.iter().map(listing_to_json).collect(),
        };

        serde_json::to_string_pretty(&result).map_err(json_error)
    }
}

impl DisassemblyFormatter for super::JsonLinesFormatter {
    fn format(&self, disassembly: &Disassembly) -> Result<String, DisassemblyError> {
        let mut output = String::new();

        for listing in &disassembly.listings {
            let kind = kind_tag(listing.descriptor.kind);
            let start = hex(listing.descriptor.start);

            let buffer = json!({
                "type": "buffer",
                "kind": kind,
                "start": start,
                "end": listing.descriptor.end.map(hex),
                "error": listing.error,
            });
            output.push_str(&serde_json::to_string(&buffer).map_err(json_error)?);
            output.push('\n');

            for line in &listing.lines {
                let line_json = line_to_json(line);
                let object = json!({
                    "type": "line",
                    "buffer_start": start,
                    "address": line_json.address,
                    "text": line_json.text,
                    "invalid_opcode": line_json.invalid_opcode,
                });
                output.push_str(&serde_json::to_string(&object).map_err(json_error)?);
                output.push('\n');
            }
        }

        Ok(output)
    }
}
