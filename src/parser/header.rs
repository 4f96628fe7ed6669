//! Header structures and validation for the COW image format.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Seek, SeekFrom};
use thiserror::Error;

/// Errors that can occur during parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Header too small: expected at least {expected} bytes, got {actual}")]
    HeaderTooSmall { expected: usize, actual: usize },

    #[error("Unexpected footer: footer_size is {footer_size}, this format revision has none")]
    UnexpectedFooter { footer_size: u32 },

    #[error("Operation size mismatch: engine uses {expected} bytes, header declares {actual}")]
    OpSizeMismatch { expected: u32, actual: u32 },

    #[error("Clustered layout not supported: cluster_ops is {cluster_ops}, expected 0")]
    ClusteredLayout { cluster_ops: u32 },

    #[error(
        "Unsupported version {major}.{minor}: need major <= {max_major} and minor == {expected_minor}"
    )]
    UnsupportedVersion {
        major: u16,
        minor: u16,
        max_major: u16,
        expected_minor: u16,
    },

    #[error("Unknown operation type {tag} at offset {offset}")]
    UnknownOpType { tag: u8, offset: u64 },

    #[error("Checkpoint {requested} not found before offset {offset} (last seen: {})", display_label(.last_seen))]
    CheckpointNotFound {
        requested: u64,
        last_seen: Option<u64>,
        offset: u64,
    },

    #[error("Read failed at offset {offset}: {source}")]
    ReadAt {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn display_label(label: &Option<u64>) -> String {
    match label {
        Some(id) => id.to_string(),
        None => "none".to_string(),
    }
}

/// Broad failure classes, used by callers deciding whether a file is salvageable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The header or a record violates the format; the whole file is unusable.
    Structural,
    /// The byte source failed a read or seek.
    Io,
    /// A requested checkpoint was never written.
    Incomplete,
}

impl ParseError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ParseError::HeaderTooSmall { .. }
            | ParseError::UnexpectedFooter { .. }
            | ParseError::OpSizeMismatch { .. }
            | ParseError::ClusteredLayout { .. }
            | ParseError::UnsupportedVersion { .. }
            | ParseError::UnknownOpType { .. } => ErrorClass::Structural,
            ParseError::ReadAt { .. } | ParseError::Io(_) => ErrorClass::Io,
            ParseError::CheckpointNotFound { .. } => ErrorClass::Incomplete,
        }
    }

    /// Last checkpoint seen before an incompleteness failure.
    pub fn last_checkpoint(&self) -> Option<u64> {
        match self {
            ParseError::CheckpointNotFound { last_seen, .. } => *last_seen,
            _ => None,
        }
    }
}

/// Size in bytes of one operation record as laid out by this engine.
pub const COW_OP_SIZE: u32 = 21;

/// Size of the header this engine writes.
pub const COW_HEADER_SIZE: usize = 40;

/// Shortest header accepted: everything up to and including `cluster_ops`.
pub const COW_HEADER_MIN_SIZE: usize = 20;

/// Headers shorter than this predate the scratch-region field.
const BUFFER_SIZE_END: usize = 28;
const BLOCK_SIZE_END: usize = 32;
const NUM_MERGE_OPS_END: usize = 40;

/// Version and layout constants the validator checks a header against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatLimits {
    pub max_major: u16,
    pub expected_minor: u16,
    pub op_size: u32,
}

impl FormatLimits {
    pub const fn new() -> Self {
        Self {
            max_major: 2,
            expected_minor: 0,
            op_size: COW_OP_SIZE,
        }
    }
}

impl Default for FormatLimits {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated image header (little-endian, packed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CowHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub header_size: u32,
    pub footer_size: u32,
    pub op_size: u32,
    pub cluster_ops: u32,
    /// Zero when the header predates the scratch region.
    pub buffer_size: u64,
    pub block_size: u32,
    pub num_merge_ops: u64,
    /// Writer-controlled bytes past the known fields.
    #[serde(skip)]
    pub extra: Vec<u8>,
}

impl CowHeader {
    /// Decode a header and check it against `limits`.
    ///
    /// `data` must hold at least `header_size` bytes; anything past it is ignored.
    pub fn decode(data: &[u8], limits: &FormatLimits) -> Result<Self, ParseError> {
        if data.len() < COW_HEADER_MIN_SIZE {
            return Err(ParseError::HeaderTooSmall {
                expected: COW_HEADER_MIN_SIZE,
                actual: data.len(),
            });
        }

        let header_size = le_u32(data, 4);
        let declared = header_size as usize;
        if declared < COW_HEADER_MIN_SIZE {
            return Err(ParseError::HeaderTooSmall {
                expected: COW_HEADER_MIN_SIZE,
                actual: declared,
            });
        }
        if data.len() < declared {
            return Err(ParseError::HeaderTooSmall {
                expected: declared,
                actual: data.len(),
            });
        }
        let data = &data[..declared];

        let header = Self {
            major_version: u16::from_le_bytes([data[0], data[1]]),
            minor_version: u16::from_le_bytes([data[2], data[3]]),
            header_size,
            footer_size: le_u32(data, 8),
            op_size: le_u32(data, 12),
            cluster_ops: le_u32(data, 16),
            buffer_size: if declared >= BUFFER_SIZE_END { le_u64(data, 20) } else { 0 },
            block_size: if declared >= BLOCK_SIZE_END { le_u32(data, 28) } else { 0 },
            num_merge_ops: if declared >= NUM_MERGE_OPS_END { le_u64(data, 32) } else { 0 },
            extra: data.get(NUM_MERGE_OPS_END..).unwrap_or_default().to_vec(),
        };

        header.validate(limits)?;
        Ok(header)
    }

    /// Check the structural invariants, in order: footer, record size,
    /// clustering, version.
    pub fn validate(&self, limits: &FormatLimits) -> Result<(), ParseError> {
        if self.footer_size != 0 {
            return Err(ParseError::UnexpectedFooter {
                footer_size: self.footer_size,
            });
        }
        if self.op_size != limits.op_size {
            return Err(ParseError::OpSizeMismatch {
                expected: limits.op_size,
                actual: self.op_size,
            });
        }
        if self.cluster_ops != 0 {
            return Err(ParseError::ClusteredLayout {
                cluster_ops: self.cluster_ops,
            });
        }
        if self.major_version > limits.max_major || self.minor_version != limits.expected_minor {
            return Err(ParseError::UnsupportedVersion {
                major: self.major_version,
                minor: self.minor_version,
                max_major: limits.max_major,
                expected_minor: limits.expected_minor,
            });
        }
        Ok(())
    }

    /// File offset of the first operation record.
    pub fn body_offset(&self) -> u64 {
        u64::from(self.header_size).saturating_add(self.buffer_size)
    }

    /// Serialize to the on-disk layout. Produces `header_size` bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header_size as usize);
        out.extend_from_slice(&self.major_version.to_le_bytes());
        out.extend_from_slice(&self.minor_version.to_le_bytes());
        out.extend_from_slice(&self.header_size.to_le_bytes());
        out.extend_from_slice(&self.footer_size.to_le_bytes());
        out.extend_from_slice(&self.op_size.to_le_bytes());
        out.extend_from_slice(&self.cluster_ops.to_le_bytes());
        out.extend_from_slice(&self.buffer_size.to_le_bytes());
        out.extend_from_slice(&self.block_size.to_le_bytes());
        out.extend_from_slice(&self.num_merge_ops.to_le_bytes());
        out.extend_from_slice(&self.extra);
        out.resize(self.header_size as usize, 0);
        out
    }
}

/// Read and validate the header at the start of `source`.
///
/// The fixed prefix is read first so that `header_size` is known before the
/// remainder is requested. Leaves the source positioned after the header.
pub fn read_header<R: Read + Seek>(
    source: &mut R,
    limits: &FormatLimits,
) -> Result<CowHeader, ParseError> {
    let file_len = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(0))?;

    let mut buf = vec![0u8; COW_HEADER_MIN_SIZE];
    source.read_exact(&mut buf).map_err(|source| match source.kind() {
        io::ErrorKind::UnexpectedEof => ParseError::HeaderTooSmall {
            expected: COW_HEADER_MIN_SIZE,
            actual: file_len as usize,
        },
        _ => ParseError::ReadAt { offset: 0, source },
    })?;

    // A short remainder is reported by `decode` against the declared size.
    let remaining = u64::from(le_u32(&buf, 4)).saturating_sub(COW_HEADER_MIN_SIZE as u64);
    if remaining > 0 {
        let mut rest = source.by_ref().take(remaining);
        if let Err(source) = rest.read_to_end(&mut buf) {
            return Err(ParseError::ReadAt {
                offset: buf.len() as u64,
                source,
            });
        }
    }

    let header = CowHeader::decode(&buf, limits)?;
    log::debug!(
        "cow header v{}.{}: header_size={} buffer_size={} block_size={}",
        header.major_version,
        header.minor_version,
        header.header_size,
        header.buffer_size,
        header.block_size
    );
    Ok(header)
}

pub(crate) fn le_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

pub(crate) fn le_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> CowHeader {
        CowHeader {
            major_version: 2,
            minor_version: 0,
            header_size: COW_HEADER_SIZE as u32,
            footer_size: 0,
            op_size: COW_OP_SIZE,
            cluster_ops: 0,
            buffer_size: 512,
            block_size: 4096,
            num_merge_ops: 7,
            extra: Vec::new(),
        }
    }

    #[test]
    fn test_decode_valid_header() {
        let bytes = sample().encode();
        assert_eq!(bytes.len(), COW_HEADER_SIZE);

        let header = CowHeader::decode(&bytes, &FormatLimits::default()).unwrap();
        assert_eq!(header, sample());
        assert_eq!(header.body_offset(), 40 + 512);
    }

    #[test]
    fn test_rejects_footer() {
        let mut h = sample();
        h.footer_size = 32;
        let err = CowHeader::decode(&h.encode(), &FormatLimits::default()).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedFooter { footer_size: 32 }));
        assert_eq!(err.class(), ErrorClass::Structural);
    }

    #[test]
    fn test_rejects_op_size_mismatch() {
        let mut h = sample();
        h.op_size = 20;
        let err = CowHeader::decode(&h.encode(), &FormatLimits::default()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::OpSizeMismatch {
                expected: COW_OP_SIZE,
                actual: 20
            }
        ));
    }

    #[test]
    fn test_rejects_cluster_ops() {
        let mut h = sample();
        h.cluster_ops = 200;
        let err = CowHeader::decode(&h.encode(), &FormatLimits::default()).unwrap_err();
        assert!(matches!(err, ParseError::ClusteredLayout { cluster_ops: 200 }));
    }

    #[test]
    fn test_version_gate() {
        let limits = FormatLimits::default();

        let mut older = sample();
        older.major_version = 1;
        assert!(CowHeader::decode(&older.encode(), &limits).is_ok());

        let mut newer = sample();
        newer.major_version = 3;
        assert!(matches!(
            CowHeader::decode(&newer.encode(), &limits),
            Err(ParseError::UnsupportedVersion { major: 3, .. })
        ));

        let mut minor = sample();
        minor.minor_version = 1;
        assert!(matches!(
            CowHeader::decode(&minor.encode(), &limits),
            Err(ParseError::UnsupportedVersion { minor: 1, .. })
        ));
    }

    #[test]
    fn test_footer_checked_before_version() {
        let mut h = sample();
        h.footer_size = 8;
        h.major_version = 9;
        let err = CowHeader::decode(&h.encode(), &FormatLimits::default()).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedFooter { .. }));
    }

    #[test]
    fn test_legacy_header_has_no_scratch_region() {
        let mut h = sample();
        h.header_size = 24;
        let bytes = h.encode();
        assert_eq!(bytes.len(), 24);

        let header = CowHeader::decode(&bytes, &FormatLimits::default()).unwrap();
        assert_eq!(header.buffer_size, 0);
        assert_eq!(header.block_size, 0);
        assert_eq!(header.body_offset(), 24);
    }

    #[test]
    fn test_extra_bytes_pass_through() {
        let mut h = sample();
        h.header_size = 48;
        h.extra = vec![0xAB; 8];
        let header = CowHeader::decode(&h.encode(), &FormatLimits::default()).unwrap();
        assert_eq!(header.extra, vec![0xAB; 8]);
    }

    #[test]
    fn test_too_small() {
        let err = CowHeader::decode(&[0u8; 10], &FormatLimits::default()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::HeaderTooSmall {
                expected: 20,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_read_header_from_source() {
        let mut bytes = sample().encode();
        bytes.extend_from_slice(&[0u8; 64]);
        let mut cursor = Cursor::new(bytes);
        let header = read_header(&mut cursor, &FormatLimits::default()).unwrap();
        assert_eq!(header.block_size, 4096);
    }

    #[test]
    fn test_read_header_truncated_source() {
        let bytes = sample().encode();
        let mut cursor = Cursor::new(bytes[..30].to_vec());
        let err = read_header(&mut cursor, &FormatLimits::default()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::HeaderTooSmall {
                expected: 40,
                actual: 30
            }
        ));
    }

    #[test]
    fn test_read_header_short_prefix() {
        let mut cursor = Cursor::new(vec![2u8; 10]);
        let err = read_header(&mut cursor, &FormatLimits::default()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::HeaderTooSmall {
                expected: 20,
                actual: 10
            }
        ));
    }

    /// Reader that fails once its position reaches `limit`.
    struct FailingReader {
        inner: Cursor<Vec<u8>>,
        limit: u64,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let pos = self.inner.position();
            if pos >= self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "device gone"));
            }
            let max = ((self.limit - pos) as usize).min(buf.len());
            self.inner.read(&mut buf[..max])
        }
    }

    impl Seek for FailingReader {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_read_header_io_failure_reports_offset() {
        let mut source = FailingReader {
            inner: Cursor::new(sample().encode()),
            limit: 30,
        };
        let err = read_header(&mut source, &FormatLimits::default()).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Io);
        assert!(matches!(err, ParseError::ReadAt { offset: 30, .. }));
    }

    #[test]
    fn test_limits_from_json() {
        let limits: FormatLimits = serde_json::from_str(r#"{"max_major": 3}"#).unwrap();
        assert_eq!(limits.max_major, 3);
        assert_eq!(limits.expected_minor, 0);
        assert_eq!(limits.op_size, COW_OP_SIZE);
    }
}
