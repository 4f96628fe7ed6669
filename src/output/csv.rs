//! CSV output format.

use crate::parser::{OpKind, ParseResult};
use std::io::{self, Write};

/// Write the operation table as CSV to a writer.
///
/// Format: index,kind,new_block,data_length,source_info,data_offset
///
/// `data_offset` is filled for XOR operations whose payload the index still
/// points at; superseded ones are left blank.
pub fn write_csv<W: Write>(result: &ParseResult, mut writer: W) -> io::Result<()> {
    writeln!(writer, "index,kind,new_block,data_length,source_info,data_offset")?;

    let op_size = u64::from(result.header().op_size);
    let mut pos = result.header().body_offset();

    for (i, op) in result.operations().iter().enumerate() {
        let payload_at = pos + op_size;
        let data_offset = result
            .lookup_data_offset(op.new_block)
            .filter(|&offset| op.kind == OpKind::Xor && offset == payload_at);

        write!(
            writer,
            "{},{},{},{},{},",
            i, op.kind, op.new_block, op.data_length, op.source_info
        )?;
        if let Some(offset) = data_offset {
            write!(writer, "{}", offset)?;
        }
        writeln!(writer)?;

        pos = payload_at + op.payload_len();
    }

    Ok(())
}

/// Write the operation table as a CSV string.
pub fn to_csv_string(result: &ParseResult) -> io::Result<String> {
    let mut buf = Vec::new();
    write_csv(result, &mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
