// Per-frame operation logs.
//
// An `OperationLog` maps frame index -> `FrameLog`, the ordered list of
// records that happened at that frame. The round keeps two of them:
// - the pending log, filled by submissions and drained on every flush;
// - the history log, which only ever grows (by `append`) until round end,
//   and is what a reconnecting player is replayed.
//
// Within one frame, insertion order is the broadcast and replay order.
// Frame indices iterate in ascending order (`BTreeMap`) so output is
// deterministic, though receivers must not depend on inter-frame order.
//
// A frame index is never overwritten: appending into a frame that already
// has records extends it.

use std::collections::BTreeMap;

use lockstep_protocol::{FrameIndex, OperationRecord};

/// Records of a single frame, in arrival order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameLog {
    records: Vec<OperationRecord>,
}

impl FrameLog {
    pub fn push(&mut self, record: OperationRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[OperationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// How much an `append` moved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppendStats {
    pub records: usize,
    /// Sum of the records' exact encoded lengths.
    pub bytes: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperationLog {
    frames: BTreeMap<FrameIndex, FrameLog>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record to `frame`, creating the frame log if absent.
    pub fn push(&mut self, frame: FrameIndex, record: OperationRecord) {
        self.frames.entry(frame).or_default().push(record);
    }

    /// Move every record of `other` onto the end of the matching frame log
    /// here, preserving per-frame order.
    pub fn append(&mut self, other: OperationLog) -> AppendStats {
        let mut stats = AppendStats::default();
        for (frame, log) in other.frames {
            if log.is_empty() {
                continue;
            }
            let target = self.frames.entry(frame).or_default();
            for record in log.records {
                stats.records += 1;
                stats.bytes += record.encoded_len();
                target.push(record);
            }
        }
        stats
    }

    pub fn get(&self, frame: FrameIndex) -> Option<&FrameLog> {
        self.frames.get(&frame)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FrameIndex, &FrameLog)> {
        self.frames.iter().map(|(frame, log)| (*frame, log))
    }

    pub fn is_empty(&self) -> bool {
        self.frames.values().all(FrameLog::is_empty)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn record_count(&self) -> usize {
        self.frames.values().map(FrameLog::len).sum()
    }

    /// Take the whole log, leaving this one empty.
    pub fn take(&mut self) -> OperationLog {
        std::mem::take(self)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use lockstep_protocol::{OpType, PlayerId};

    use super::*;

    fn op(owner: u32, op_type: u32, payload: &[u8]) -> OperationRecord {
        OperationRecord::new(PlayerId(owner), OpType(op_type), payload.to_vec())
    }

    #[test]
    fn push_preserves_order_within_frame() {
        let mut log = OperationLog::new();
        log.push(FrameIndex(5), op(1, 10, b"a"));
        log.push(FrameIndex(5), op(2, 11, b"b"));
        log.push(FrameIndex(5), op(1, 12, b"c"));

        let frame = log.get(FrameIndex(5)).unwrap();
        let types: Vec<u32> = frame.records().iter().map(|r| r.op_type.0).collect();
        assert_eq!(types, vec![10, 11, 12]);
        assert_eq!(log.record_count(), 3);
        assert_eq!(log.frame_count(), 1);
    }

    #[test]
    fn append_extends_existing_frames() {
        let mut history = OperationLog::new();
        history.push(FrameIndex(3), op(1, 10, b"old"));

        let mut pending = OperationLog::new();
        pending.push(FrameIndex(3), op(2, 20, b"new"));
        pending.push(FrameIndex(4), op(2, 21, b""));

        let stats = history.append(pending);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.bytes, (12 + 3) + 12);

        let frame3: Vec<u32> = history
            .get(FrameIndex(3))
            .unwrap()
            .records()
            .iter()
            .map(|r| r.op_type.0)
            .collect();
        assert_eq!(frame3, vec![10, 20]);
        assert_eq!(history.get(FrameIndex(4)).unwrap().len(), 1);
    }

    #[test]
    fn take_leaves_empty_log() {
        let mut log = OperationLog::new();
        log.push(FrameIndex(1), op(1, 1, b"x"));
        let taken = log.take();
        assert!(log.is_empty());
        assert_eq!(log.frame_count(), 0);
        assert_eq!(taken.record_count(), 1);
    }

    #[test]
    fn frames_iterate_ascending() {
        let mut log = OperationLog::new();
        for frame in [9, 2, 5] {
            log.push(FrameIndex(frame), op(1, 1, b""));
        }
        let frames: Vec<u32> = log.iter().map(|(f, _)| f.0).collect();
        assert_eq!(frames, vec![2, 5, 9]);
    }
}
