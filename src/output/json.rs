//! JSON output format.

use crate::parser::{CowHeader, CowOperation, ParseResult, ScanStats};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// JSON report for one parsed image.
#[derive(Serialize)]
pub struct JsonReport<'a> {
    pub header: &'a CowHeader,
    pub stats: &'a ScanStats,
    pub last_checkpoint: Option<u64>,
    pub labels: Vec<u64>,
    pub counts: BTreeMap<&'static str, usize>,
    /// Block to payload offset, sorted by block.
    pub xor_index: Vec<IndexEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<&'a [CowOperation]>,
}

#[derive(Serialize)]
pub struct IndexEntry {
    pub block: u64,
    pub offset: u64,
}

impl<'a> JsonReport<'a> {
    pub fn new(result: &'a ParseResult, include_ops: bool) -> Self {
        Self {
            header: result.header(),
            stats: result.stats(),
            last_checkpoint: result.last_checkpoint(),
            labels: result.labels(),
            counts: result.counts_by_kind(),
            xor_index: result
                .index()
                .sorted()
                .into_iter()
                .map(|(block, offset)| IndexEntry { block, offset })
                .collect(),
            operations: include_ops.then(|| result.operations()),
        }
    }
}

/// Write a parse result as JSON to a writer.
pub fn write_json<W: Write>(
    result: &ParseResult,
    writer: W,
    include_ops: bool,
    pretty: bool,
) -> Result<(), serde_json::Error> {
    let report = JsonReport::new(result, include_ops);
    if pretty {
        serde_json::to_writer_pretty(writer, &report)
    } else {
        serde_json::to_writer(writer, &report)
    }
}

/// Write a parse result as a JSON string.
pub fn to_json_string(
    result: &ParseResult,
    include_ops: bool,
    pretty: bool,
) -> Result<String, serde_json::Error> {
    let report = JsonReport::new(result, include_ops);
    if pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, read_header, FormatLimits};
    use crate::writer::{CowWriter, WriterOptions};
    use std::io::Cursor;

    fn sample() -> ParseResult {
        let mut writer = CowWriter::new(Cursor::new(Vec::new()), WriterOptions::default()).unwrap();
        writer.add_copy(1, 2).unwrap();
        writer.add_xor(5, 0, &[3u8; 8]).unwrap();
        writer.add_label(11).unwrap();
        let mut cursor = writer.finish().unwrap();
        let header = read_header(&mut cursor, &FormatLimits::default()).unwrap();
        parse(&mut cursor, &header, None).unwrap()
    }

    #[test]
    fn test_json_report_fields() {
        let result = sample();
        let json = to_json_string(&result, true, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["header"]["major_version"], 2);
        assert_eq!(value["last_checkpoint"], 11);
        assert_eq!(value["counts"]["xor"], 1);
        assert_eq!(value["xor_index"][0]["block"], 5);
        assert_eq!(value["xor_index"][0]["offset"], 40 + 21 + 21);
        assert_eq!(value["operations"][1]["kind"], "xor");
        assert_eq!(value["stats"]["records"], 3);
    }

    #[test]
    fn test_operations_optional() {
        let result = sample();
        let json = to_json_string(&result, false, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("operations").is_none());
    }
}
