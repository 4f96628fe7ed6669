//! Operation records.

use super::header::{le_u32, le_u64, ParseError, COW_OP_SIZE};
use serde::Serialize;
use std::fmt;

/// Record kind, stored as the first byte of every operation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Block is identical to base block `source_info`.
    Copy,
    /// Block is replaced by the trailing payload.
    Replace,
    /// Block is all zeroes.
    Zero,
    /// Checkpoint marker; `source_info` is the checkpoint id.
    Label,
    /// Closes the current batch of records.
    Cluster,
    /// Base bytes at offset `source_info` XOR the trailing payload.
    Xor,
}

impl OpKind {
    pub const ALL: [OpKind; 6] = [
        OpKind::Copy,
        OpKind::Replace,
        OpKind::Zero,
        OpKind::Label,
        OpKind::Cluster,
        OpKind::Xor,
    ];

    pub fn tag(self) -> u8 {
        match self {
            OpKind::Copy => 1,
            OpKind::Replace => 2,
            OpKind::Zero => 3,
            OpKind::Label => 4,
            OpKind::Cluster => 5,
            OpKind::Xor => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(OpKind::Copy),
            2 => Some(OpKind::Replace),
            3 => Some(OpKind::Zero),
            4 => Some(OpKind::Label),
            5 => Some(OpKind::Cluster),
            6 => Some(OpKind::Xor),
            _ => None,
        }
    }

    /// Whether records of this kind are followed by `data_length` payload bytes.
    pub fn has_payload(self) -> bool {
        matches!(self, OpKind::Replace | OpKind::Xor)
    }

    pub fn name(self) -> &'static str {
        match self {
            OpKind::Copy => "copy",
            OpKind::Replace => "replace",
            OpKind::Zero => "zero",
            OpKind::Label => "label",
            OpKind::Cluster => "cluster",
            OpKind::Xor => "xor",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded operation record (21 bytes, packed).
///
/// ```text
/// 0   type         u8
/// 1   new_block    u64
/// 9   data_length  u32
/// 13  source_info  u64
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CowOperation {
    pub kind: OpKind,
    pub new_block: u64,
    pub data_length: u32,
    pub source_info: u64,
}

impl CowOperation {
    pub const SIZE: usize = COW_OP_SIZE as usize;

    pub fn copy(new_block: u64, source_block: u64) -> Self {
        Self::new(OpKind::Copy, new_block, 0, source_block)
    }

    pub fn replace(new_block: u64, data_length: u32) -> Self {
        Self::new(OpKind::Replace, new_block, data_length, 0)
    }

    pub fn zero(new_block: u64) -> Self {
        Self::new(OpKind::Zero, new_block, 0, 0)
    }

    pub fn xor(new_block: u64, data_length: u32, source_offset: u64) -> Self {
        Self::new(OpKind::Xor, new_block, data_length, source_offset)
    }

    pub fn label(id: u64) -> Self {
        Self::new(OpKind::Label, 0, 0, id)
    }

    pub fn cluster() -> Self {
        Self::new(OpKind::Cluster, 0, 0, 0)
    }

    fn new(kind: OpKind, new_block: u64, data_length: u32, source_info: u64) -> Self {
        Self {
            kind,
            new_block,
            data_length,
            source_info,
        }
    }

    /// Decode a record read from file offset `offset`.
    ///
    /// `data_length` is kept as stored, even for kinds that carry no payload.
    pub fn from_bytes(data: &[u8; Self::SIZE], offset: u64) -> Result<Self, ParseError> {
        let kind = OpKind::from_tag(data[0]).ok_or(ParseError::UnknownOpType {
            tag: data[0],
            offset,
        })?;
        Ok(Self {
            kind,
            new_block: le_u64(data, 1),
            data_length: le_u32(data, 9),
            source_info: le_u64(data, 13),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.kind.tag();
        out[1..9].copy_from_slice(&self.new_block.to_le_bytes());
        out[9..13].copy_from_slice(&self.data_length.to_le_bytes());
        out[13..21].copy_from_slice(&self.source_info.to_le_bytes());
        out
    }

    /// Bytes that follow this record in the stream. Zero for payload-free
    /// kinds whatever their stored `data_length`.
    pub fn payload_len(&self) -> u64 {
        if self.kind.has_payload() {
            u64::from(self.data_length)
        } else {
            0
        }
    }

    /// Checkpoint id, for `Label` records only.
    pub fn label_id(&self) -> Option<u64> {
        match self.kind {
            OpKind::Label => Some(self.source_info),
            _ => None,
        }
    }
}
