//! Logical block to payload offset index.

use std::collections::HashMap;

/// Maps a logical block to the absolute file offset of its XOR payload.
///
/// Later inserts for the same block replace earlier ones, matching an
/// append-only stream where the newest operation wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataIndex {
    locations: HashMap<u64, u64>,
}

impl DataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `offset` for `block`, returning the offset it replaced.
    pub fn insert(&mut self, block: u64, offset: u64) -> Option<u64> {
        self.locations.insert(block, offset)
    }

    pub fn lookup(&self, block: u64) -> Option<u64> {
        self.locations.get(&block).copied()
    }

    pub fn contains(&self, block: u64) -> bool {
        self.locations.contains_key(&block)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.locations.iter().map(|(&block, &offset)| (block, offset))
    }

    /// Entries sorted by block number.
    pub fn sorted(&self) -> Vec<(u64, u64)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_unstable();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let mut index = DataIndex::new();
        assert_eq!(index.insert(3, 100), None);
        assert_eq!(index.insert(3, 900), Some(100));
        assert_eq!(index.lookup(3), Some(900));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_missing_block() {
        let index = DataIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.lookup(0), None);
        assert!(!index.contains(0));
    }

    #[test]
    fn test_sorted_entries() {
        let mut index = DataIndex::new();
        index.insert(9, 1);
        index.insert(2, 5);
        index.insert(4, 3);
        assert_eq!(index.sorted(), vec![(2, 5), (4, 3), (9, 1)]);
    }
}
