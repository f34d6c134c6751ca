//! Per-partition cursor tracking and source checkpoints.
//!
//! [`CursorTracker`] follows each partition's delivered and acknowledged
//! positions; [`SourceCheckpoint`] captures the acknowledged positions as
//! string key-value pairs so a restarted source can resume.

use std::collections::HashMap;

use crate::error::BridgeError;
use crate::position::{Cursor, MessageId};

/// Checkpoint state for a source.
///
/// Offsets are keyed `partition-<n>` and hold the `ledger:entry` encoding
/// of the last acknowledged position, e.g.
/// `{"partition-0": "12:34", "partition-1": "7:0"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceCheckpoint {
    offsets: HashMap<String, String>,
    epoch: u64,
}

impl SourceCheckpoint {
    /// Creates an empty checkpoint.
    #[must_use]
    pub fn new(epoch: u64) -> Self {
        Self {
            offsets: HashMap::new(),
            epoch,
        }
    }

    /// Sets a partition offset.
    pub fn set_offset(&mut self, partition: i32, id: MessageId) {
        self.offsets
            .insert(format!("partition-{partition}"), id.to_string());
    }

    /// Gets a partition offset.
    #[must_use]
    pub fn get_offset(&self, partition: i32) -> Option<&str> {
        self.offsets
            .get(&format!("partition-{partition}"))
            .map(String::as_str)
    }

    /// Returns all offsets.
    #[must_use]
    pub fn offsets(&self) -> &HashMap<String, String> {
        &self.offsets
    }

    /// Returns the epoch number.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns `true` if the checkpoint has no offsets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Decodes the checkpoint into per-partition resume cursors.
    ///
    /// Each recorded position yields `Cursor::After`, so the first message
    /// delivered after a restart is the one following the last ack.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` if an offset key or value is
    /// malformed.
    pub fn resume_cursors(&self) -> Result<HashMap<i32, Cursor>, BridgeError> {
        let mut cursors = HashMap::with_capacity(self.offsets.len());
        for (key, value) in &self.offsets {
            let partition: i32 = key
                .strip_prefix("partition-")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| {
                    BridgeError::Configuration(format!("malformed checkpoint key '{key}'"))
                })?;
            cursors.insert(partition, Cursor::After(MessageId::parse(value)?));
        }
        Ok(cursors)
    }
}

/// Tracks delivered and acknowledged positions per partition.
#[derive(Debug, Default)]
pub struct CursorTracker {
    delivered: HashMap<i32, MessageId>,
    acked: HashMap<i32, MessageId>,
    pending: HashMap<i32, Vec<MessageId>>,
}

impl CursorTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message handed off to the caller but not yet acknowledged.
    pub fn record_delivered(&mut self, partition: i32, id: MessageId) {
        self.delivered.insert(partition, id);
        self.pending.entry(partition).or_default().push(id);
    }

    /// Drains every pending position, for acknowledgment after hand-off.
    pub fn take_pending(&mut self) -> Vec<(i32, MessageId)> {
        let mut out = Vec::new();
        for (partition, ids) in &mut self.pending {
            out.extend(ids.drain(..).map(|id| (*partition, id)));
        }
        out
    }

    /// Records a successful acknowledgment.
    pub fn record_acked(&mut self, partition: i32, id: MessageId) {
        match self.acked.get(&partition) {
            Some(existing) if *existing >= id => {}
            _ => {
                self.acked.insert(partition, id);
            }
        }
    }

    /// Last delivered position of a partition.
    #[must_use]
    pub fn delivered(&self, partition: i32) -> Option<MessageId> {
        self.delivered.get(&partition).copied()
    }

    /// Number of delivered-but-unacknowledged messages.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Builds a checkpoint from acknowledged positions only.
    ///
    /// Messages delivered but not yet acknowledged are excluded, so a
    /// restore re-delivers them.
    #[must_use]
    pub fn to_checkpoint(&self, epoch: u64) -> SourceCheckpoint {
        let mut checkpoint = SourceCheckpoint::new(epoch);
        for (partition, id) in &self.acked {
            checkpoint.set_offset(*partition, *id);
        }
        checkpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_offsets() {
        let mut cp = SourceCheckpoint::new(1);
        cp.set_offset(0, MessageId::new(12, 34));
        cp.set_offset(1, MessageId::new(7, 0));

        assert_eq!(cp.epoch(), 1);
        assert_eq!(cp.get_offset(0), Some("12:34"));
        assert_eq!(cp.get_offset(1), Some("7:0"));
        assert_eq!(cp.get_offset(2), None);
        assert!(!cp.is_empty());
    }

    #[test]
    fn test_checkpoint_resume_cursors() {
        let mut cp = SourceCheckpoint::new(2);
        cp.set_offset(0, MessageId::new(5, 9));

        let cursors = cp.resume_cursors().unwrap();
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[&0], Cursor::After(MessageId::new(5, 9)));
        // The recorded position itself is not re-delivered
        assert!(!cursors[&0].admits(MessageId::new(5, 9)));
        assert!(cursors[&0].admits(MessageId::new(5, 10)));
    }

    #[test]
    fn test_tracker_ack_after_handoff() {
        let mut tracker = CursorTracker::new();
        tracker.record_delivered(0, MessageId::new(1, 0));
        tracker.record_delivered(0, MessageId::new(1, 1));
        assert_eq!(tracker.pending_count(), 2);

        // Checkpoint before ack carries nothing
        assert!(tracker.to_checkpoint(1).is_empty());

        let pending = tracker.take_pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(tracker.pending_count(), 0);

        for (partition, id) in pending {
            tracker.record_acked(partition, id);
        }
        let cp = tracker.to_checkpoint(1);
        assert_eq!(cp.get_offset(0), Some("1:1"));
    }

    #[test]
    fn test_tracker_ack_keeps_highest() {
        let mut tracker = CursorTracker::new();
        tracker.record_acked(0, MessageId::new(2, 5));
        tracker.record_acked(0, MessageId::new(2, 3));
        let cp = tracker.to_checkpoint(0);
        assert_eq!(cp.get_offset(0), Some("2:5"));
    }

    #[test]
    fn test_tracker_partitions_independent() {
        let mut tracker = CursorTracker::new();
        tracker.record_delivered(0, MessageId::new(1, 0));
        tracker.record_delivered(3, MessageId::new(9, 9));
        assert_eq!(tracker.delivered(0), Some(MessageId::new(1, 0)));
        assert_eq!(tracker.delivered(3), Some(MessageId::new(9, 9)));
        assert_eq!(tracker.delivered(1), None);
    }
}
