//! Checkpoint tracking for resumable scans.

use super::header::ParseError;

/// Tracks the checkpoints seen during a scan and whether the caller's
/// requested checkpoint has been reached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelTracker {
    target: Option<u64>,
    last: Option<u64>,
}

impl LabelTracker {
    pub fn new(target: Option<u64>) -> Self {
        Self { target, last: None }
    }

    /// Record a checkpoint. Returns `true` when it is the requested one and
    /// scanning should stop.
    pub fn observe(&mut self, id: u64) -> bool {
        self.last = Some(id);
        self.target == Some(id)
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    pub fn target(&self) -> Option<u64> {
        self.target
    }

    /// Close out a scan that ran to the end of the data without stopping at
    /// a checkpoint. Fails if one was requested.
    pub fn finish(&self, offset: u64) -> Result<Option<u64>, ParseError> {
        match self.target {
            Some(requested) => {
                log::warn!(
                    "checkpoint {} not found, scan ended at offset {} (last seen: {:?})",
                    requested,
                    offset,
                    self.last
                );
                Err(ParseError::CheckpointNotFound {
                    requested,
                    last_seen: self.last,
                    offset,
                })
            }
            None => Ok(self.last),
        }
    }
}
