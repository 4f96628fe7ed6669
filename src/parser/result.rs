//! Parse result assembly.

use super::header::CowHeader;
use super::index::DataIndex;
use super::op::{CowOperation, OpKind};
use serde::Serialize;
use std::collections::BTreeMap;

/// Counters gathered while scanning the record stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Records accepted into the result.
    pub records: u64,
    /// Cluster sentinels seen.
    pub clusters: u64,
    /// Payload bytes following accepted records.
    pub payload_bytes: u64,
    /// A partial record or payload was found at the end of the file and dropped.
    pub torn_tail: bool,
    /// Offset of the first byte not consumed.
    pub end_offset: u64,
}

/// Everything recovered from one image: header, ordered operations, XOR
/// payload index and the last checkpoint. Immutable once built.
#[derive(Debug, Clone)]
pub struct ParseResult {
    header: CowHeader,
    ops: Vec<CowOperation>,
    index: DataIndex,
    last_label: Option<u64>,
    stats: ScanStats,
}

impl ParseResult {
    pub(crate) fn new(
        header: CowHeader,
        ops: Vec<CowOperation>,
        index: DataIndex,
        last_label: Option<u64>,
        stats: ScanStats,
    ) -> Self {
        Self {
            header,
            ops,
            index,
            last_label,
            stats,
        }
    }

    pub fn header(&self) -> &CowHeader {
        &self.header
    }

    /// Operations in on-disk order, which is also reconstruction order.
    pub fn operations(&self) -> &[CowOperation] {
        &self.ops
    }

    /// Payload offset of the newest XOR operation targeting `block`.
    pub fn lookup_data_offset(&self, block: u64) -> Option<u64> {
        self.index.lookup(block)
    }

    pub fn last_checkpoint(&self) -> Option<u64> {
        self.last_label
    }

    pub fn index(&self) -> &DataIndex {
        &self.index
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Checkpoint ids in the order they were written.
    pub fn labels(&self) -> Vec<u64> {
        self.ops.iter().filter_map(CowOperation::label_id).collect()
    }

    /// Number of operations of each kind; kinds that never occur are omitted.
    pub fn counts_by_kind(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for op in &self.ops {
            *counts.entry(op.kind.name()).or_insert(0) += 1;
        }
        counts
    }

    /// Operations of one kind, in order.
    pub fn ops_of_kind(&self, kind: OpKind) -> impl Iterator<Item = &CowOperation> + '_ {
        self.ops.iter().filter(move |op| op.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
