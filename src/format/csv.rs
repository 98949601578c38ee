//! CSV output formatter

use serde::Serialize;

use crate::{Disassembly, DisassemblyError, Line};
use super::{kind_tag, DisassemblyFormatter};

/// One CSV row: a listing line, or a failure note for its buffer
#[derive(Serialize)]
struct Row<'a> {
    kind: &'a str,
    buffer_start: String,
    buffer_end: String,
    address: String,
    text: String,
    error: &'a str,
}

fn csv_error<E: std::fmt::Display>(e: E) -> DisassemblyError {
    DisassemblyError::Generic(format!("CSV serialization error: {}", e))
}

impl DisassemblyFormatter for super::CsvFormatter {
    fn format(&self, disassembly: &Disassembly) -> Result<String, DisassemblyError> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        for listing in &disassembly.listings {
            let kind = kind_tag(listing.descriptor.kind);
            let buffer_start = format!("0x{:08x}", listing.descriptor.start);
            let buffer_end = listing
                .descriptor
                .end
                .map(|end| format!("0x{:08x}", end))
                .unwrap_or_default();

            for line in &listing.lines {
                let text = match line {
                    Line::Decoded { text, .. } => text.clone(),
                    Line::Invalid { byte, .. } => format!("INVALID OPCODE ({})", byte),
                };
                writer
                    .serialize(Row {
                        kind,
                        buffer_start: buffer_start.clone(),
                        buffer_end: buffer_end.clone(),
                        address: format!("0x{:08x}", line.addr()),
                        text,
                        error: "",
                    })
                    .map_err(csv_error)?;
            }

            if let Some(error) = &listing.error {
                writer
                    .serialize(Row {
                        kind,
                        buffer_start: buffer_start.clone(),
                        buffer_end: buffer_end.clone(),
                        address: String::new(),
                        text: String::new(),
                        error,
                    })
                    .map_err(csv_error)?;
            }
        }

        let bytes = writer.into_inner().map_err(csv_error)?;
        String::from_utf8(bytes).map_err(csv_error)
    }
}

#[cfg(test)]
mod tests {
    use crate::format::tests::create_test_disassembly;
    use crate::format::{CsvFormatter, DisassemblyFormatter};

    #[test]
    fn test_csv_formatter() {
        let result = CsvFormatter.format(&create_test_disassembly()).unwrap();
        let rows: Vec<&str> = result.lines().collect();

        assert_eq!(rows[0], "kind,buffer_start,buffer_end,address,text,error");
        assert_eq!(rows[1], "cl,0x00001000,,0x00001000,NV_SHADER shader_record_addr=0x2000,");
        assert_eq!(rows[2], "cl,0x00001000,,0x00001005,INVALID OPCODE (2),");
        assert_eq!(
            rows[4],
            "nv_shader_record,0x00002000,0x00002010,,,Failed to map 16 bytes at 00002000: denied"
        );
        assert_eq!(rows.len(), 5);
    }
}
