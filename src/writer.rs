//! Minimal image writer.
//!
//! Produces images the reader accepts: a header, a zero-filled scratch
//! region, then records each followed by their payload. It makes no attempt
//! at allocation or compression.

use crate::parser::{
    CowHeader, CowOperation, COW_HEADER_MIN_SIZE, COW_HEADER_SIZE, COW_OP_SIZE,
};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Header parameters for a new image.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub major_version: u16,
    pub minor_version: u16,
    /// Values below 28 produce a header without the scratch-region field.
    pub header_size: u32,
    pub buffer_size: u64,
    pub block_size: u32,
    /// Opaque bytes stored after the known header fields.
    pub extra_header: Vec<u8>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            major_version: 2,
            minor_version: 0,
            header_size: COW_HEADER_SIZE as u32,
            buffer_size: 0,
            block_size: 4096,
            extra_header: Vec::new(),
        }
    }
}

/// Appends operations to a COW image.
pub struct CowWriter<W: Write + Seek> {
    inner: W,
    header: CowHeader,
    pos: u64,
}

impl<W: Write + Seek> CowWriter<W> {
    /// Write the header and scratch region at the start of `inner`.
    pub fn new(mut inner: W, options: WriterOptions) -> io::Result<Self> {
        let full = COW_HEADER_SIZE as u32;
        let (header_size, extra) = if options.header_size >= full {
            let with_extra = full + options.extra_header.len() as u32;
            (options.header_size.max(with_extra), options.extra_header)
        } else {
            (options.header_size.max(COW_HEADER_MIN_SIZE as u32), Vec::new())
        };
        // Legacy headers stop before the scratch-region and block-size fields.
        let has_buffer_field = header_size >= 28;
        let has_block_field = header_size >= 32;

        let header = CowHeader {
            major_version: options.major_version,
            minor_version: options.minor_version,
            header_size,
            footer_size: 0,
            op_size: COW_OP_SIZE,
            cluster_ops: 0,
            buffer_size: if has_buffer_field { options.buffer_size } else { 0 },
            block_size: if has_block_field { options.block_size } else { 0 },
            num_merge_ops: 0,
            extra,
        };

        inner.seek(SeekFrom::Start(0))?;
        inner.write_all(&header.encode())?;
        io::copy(&mut io::repeat(0).take(header.buffer_size), &mut inner)?;

        Ok(Self {
            inner,
            pos: header.body_offset(),
            header,
        })
    }

    pub fn header(&self) -> &CowHeader {
        &self.header
    }

    /// Offset the next record will be written at.
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn add_copy(&mut self, new_block: u64, source_block: u64) -> io::Result<u64> {
        self.append(CowOperation::copy(new_block, source_block), &[])
    }

    /// Returns the payload offset.
    pub fn add_replace(&mut self, new_block: u64, data: &[u8]) -> io::Result<u64> {
        let op = CowOperation::replace(new_block, payload_len(data)?);
        self.append(op, data).map(|at| at + COW_OP_SIZE as u64)
    }

    pub fn add_zero(&mut self, new_block: u64) -> io::Result<u64> {
        self.append(CowOperation::zero(new_block), &[])
    }

    /// Returns the payload offset, which is what the reader indexes for `new_block`.
    pub fn add_xor(
        &mut self,
        new_block: u64,
        source_offset: u64,
        data: &[u8],
    ) -> io::Result<u64> {
        let op = CowOperation::xor(new_block, payload_len(data)?, source_offset);
        self.append(op, data).map(|at| at + COW_OP_SIZE as u64)
    }

    pub fn add_label(&mut self, id: u64) -> io::Result<u64> {
        self.append(CowOperation::label(id), &[])
    }

    pub fn add_cluster(&mut self) -> io::Result<u64> {
        self.append(CowOperation::cluster(), &[])
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }

    /// Write one record and its payload; returns the record offset.
    fn append(&mut self, op: CowOperation, data: &[u8]) -> io::Result<u64> {
        let at = self.pos;
        self.inner.seek(SeekFrom::Start(at))?;
        self.inner.write_all(&op.to_bytes())?;
        self.inner.write_all(data)?;
        self.pos = at + COW_OP_SIZE as u64 + data.len() as u64;
        log::trace!("wrote {} record for block {} at {}", op.kind, op.new_block, at);
        Ok(at)
    }
}

fn payload_len(data: &[u8]) -> io::Result<u32> {
    u32::try_from(data.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes exceeds u32 data_length", data.len()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{read_header, FormatLimits};
    use std::io::Cursor;

    #[test]
    fn test_header_and_scratch() {
        let options = WriterOptions {
            buffer_size: 100,
            ..WriterOptions::default()
        };
        let writer = CowWriter::new(Cursor::new(Vec::new()), options).unwrap();
        assert_eq!(writer.position(), 140);
        let bytes = writer.finish().unwrap().into_inner();
        assert_eq!(bytes.len(), 140);
        assert!(bytes[40..].iter().all(|&b| b == 0));

        let header = read_header(&mut Cursor::new(bytes), &FormatLimits::default()).unwrap();
        assert_eq!(header.buffer_size, 100);
    }

    #[test]
    fn test_payload_follows_record() {
        let mut writer = CowWriter::new(Cursor::new(Vec::new()), WriterOptions::default()).unwrap();
        let record = writer.add_zero(1).unwrap();
        let payload = writer.add_replace(2, b"abcd").unwrap();
        assert_eq!(record, 40);
        assert_eq!(payload, 40 + 21 + 21);

        let mut cursor = writer.finish().unwrap();
        cursor.set_position(payload);
        let mut data = [0u8; 4];
        cursor.read_exact(&mut data).unwrap();
        assert_eq!(&data, b"abcd");
    }

    #[test]
    fn test_extra_header_bytes() {
        let options = WriterOptions {
            extra_header: vec![7; 12],
            ..WriterOptions::default()
        };
        let writer = CowWriter::new(Cursor::new(Vec::new()), options).unwrap();
        assert_eq!(writer.header().header_size, 52);
        let bytes = writer.finish().unwrap().into_inner();

        let header = read_header(&mut Cursor::new(bytes), &FormatLimits::default()).unwrap();
        assert_eq!(header.extra, vec![7; 12]);
    }

    #[test]
    fn test_legacy_header_drops_scratch() {
        let options = WriterOptions {
            header_size: 24,
            buffer_size: 4096,
            ..WriterOptions::default()
        };
        let writer = CowWriter::new(Cursor::new(Vec::new()), options).unwrap();
        assert_eq!(writer.header().buffer_size, 0);
        assert_eq!(writer.position(), 24);
    }
}
