//! Operation stream scanner.
//!
//! Body layout after the header and scratch region:
//!
//! ```text
//! [rec 0][payload 0][rec 1][payload 1]...
//! ```
//!
//! `Replace` and `Xor` records are followed by `data_length` payload bytes.
//! Other kinds have no payload, whatever length they store. The record cursor
//! moves by `op_size` plus the payload; the data cursor moves by the same
//! amount and always sits at the current record's payload.

use super::header::{read_header, CowHeader, FormatLimits, ParseError};
use super::index::DataIndex;
use super::label::LabelTracker;
use super::op::{CowOperation, OpKind};
use super::result::{ParseResult, ScanStats};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Scan the operation stream of a source whose header has already been validated.
///
/// With `target` set, scanning stops right after the matching checkpoint
/// record; reaching the end of the data first is a
/// [`ParseError::CheckpointNotFound`]. Without it, every complete record is
/// consumed and a torn tail is dropped.
///
/// The source is only borrowed. Its position afterwards is unspecified.
pub fn parse<R: Read + Seek>(
    source: &mut R,
    header: &CowHeader,
    target: Option<u64>,
) -> Result<ParseResult, ParseError> {
    if header.op_size as usize != CowOperation::SIZE {
        return Err(ParseError::OpSizeMismatch {
            expected: CowOperation::SIZE as u32,
            actual: header.op_size,
        });
    }
    let op_size = u64::from(header.op_size);

    let file_len = source.seek(SeekFrom::End(0))?;
    let mut pos = header.body_offset();
    let mut data_pos = pos.saturating_add(op_size);

    let mut ops = Vec::new();
    let mut index = DataIndex::new();
    let mut labels = LabelTracker::new(target);
    let mut stats = ScanStats::default();
    let mut reached_target = false;
    let mut needs_seek = true;
    let mut buf = [0u8; CowOperation::SIZE];

    loop {
        let remaining = file_len.saturating_sub(pos);
        if remaining < op_size {
            if remaining > 0 {
                log::warn!(
                    "dropping {} trailing bytes at offset {}: partial record",
                    remaining,
                    pos
                );
                stats.torn_tail = true;
            }
            break;
        }

        if needs_seek {
            source
                .seek(SeekFrom::Start(pos))
                .map_err(|source| ParseError::ReadAt {
                    offset: pos,
                    source,
                })?;
        }
        source
            .read_exact(&mut buf)
            .map_err(|source| ParseError::ReadAt {
                offset: pos,
                source,
            })?;

        let op = CowOperation::from_bytes(&buf, pos)?;
        let payload = op.payload_len();
        let next = pos + op_size + payload;
        if next > file_len {
            log::warn!(
                "dropping {} record at offset {}: payload of {} bytes runs past end of file",
                op.kind,
                pos,
                payload
            );
            stats.torn_tail = true;
            break;
        }

        log::trace!(
            "op #{} at {}: {} block={} len={} src={}",
            ops.len(),
            pos,
            op.kind,
            op.new_block,
            op.data_length,
            op.source_info
        );

        if op.kind == OpKind::Xor {
            index.insert(op.new_block, data_pos);
        }
        pos = next;
        data_pos += payload + op_size;
        needs_seek = payload > 0;

        stats.records += 1;
        stats.payload_bytes += payload;
        ops.push(op);

        match op.kind {
            OpKind::Label => {
                if labels.observe(op.source_info) {
                    reached_target = true;
                    break;
                }
            }
            OpKind::Cluster => {
                stats.clusters += 1;
                needs_seek = true;
            }
            OpKind::Copy | OpKind::Replace | OpKind::Zero | OpKind::Xor => {}
        }
    }

    stats.end_offset = pos;
    let last_label = if reached_target {
        labels.last()
    } else {
        labels.finish(pos)?
    };

    log::debug!(
        "scanned {} ops ({} clusters, {} indexed blocks), last checkpoint {:?}, ended at {}",
        stats.records,
        stats.clusters,
        index.len(),
        last_label,
        pos
    );

    Ok(ParseResult::new(header.clone(), ops, index, last_label, stats))
}

/// Open an image file, validate its header and scan it.
pub fn open_image<P: AsRef<Path>>(
    path: P,
    limits: &FormatLimits,
    target: Option<u64>,
) -> Result<ParseResult, ParseError> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader, limits)?;
    parse(&mut reader, &header, target)
}
