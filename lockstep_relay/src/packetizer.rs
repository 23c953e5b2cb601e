// Splits an operation log into size-bounded packet bodies.
//
// Output is a sequence of `PacketBody` values, each holding a run of frame
// groups (`[frame u32][count u32][records...]`, see
// `lockstep_protocol::codec`) no longer than `capacity` bytes. Every body but
// the last is flagged `More`; the last is `Final`.
//
// Splitting happens between records. Before each record is written, if the
// record (plus a group header, when no group is open yet) would push the
// body past `capacity`, the current body is closed and emitted and a fresh
// one started. A split in the middle of a frame re-opens a group header for
// that same frame in the new body, so every body decodes on its own and no
// record ever appears outside a frame group.
//
// Record counts are not known when a group header is written; the builder
// writes 0 and back-patches the count when the group closes.
//
// The packetizer does no I/O: the round wraps each body into an addressed
// `OpsPacket` per recipient (`round.rs`). Records larger than what a fresh
// body can hold are rejected when they are recorded, never here.

use lockstep_protocol::codec::{GROUP_HEADER_LEN, patch_u32, put_u32};
use lockstep_protocol::{Continuation, FrameIndex, OperationRecord};

use crate::config::RoundConfig;
use crate::oplog::OperationLog;

/// One finished packet's content, before addressing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketBody {
    pub continuation: Continuation,
    pub frame_count: u32,
    pub frame_data: Vec<u8>,
}

#[derive(Clone, Copy, Debug)]
pub struct Packetizer {
    capacity: usize,
}

impl Packetizer {
    /// `capacity` is the frame-data budget of one packet, in bytes.
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn from_config(config: &RoundConfig) -> Self {
        Self::new(config.payload_capacity())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Serialize `log` into packet bodies, handing each to `emit` as soon
    /// as it is complete. Returns the number of records serialized.
    pub fn packetize(&self, log: &OperationLog, mut emit: impl FnMut(PacketBody)) -> usize {
        let mut body = BodyBuilder::default();
        let mut written = 0;

        for (frame, frame_log) in log.iter() {
            for record in frame_log.records() {
                let header = if body.group_open() {
                    0
                } else {
                    GROUP_HEADER_LEN
                };
                let need = header + record.encoded_len();
                if !body.is_empty() && body.len() + need > self.capacity {
                    emit(body.finish(Continuation::More));
                }
                if !body.group_open() {
                    body.open_group(frame);
                }
                body.push(record);
                written += 1;
            }
            body.close_group();
        }

        if !body.is_empty() {
            emit(body.finish(Continuation::Final));
        }
        written
    }
}

struct OpenGroup {
    count_at: usize,
    count: u32,
}

#[derive(Default)]
struct BodyBuilder {
    data: Vec<u8>,
    frame_count: u32,
    group: Option<OpenGroup>,
}

impl BodyBuilder {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn group_open(&self) -> bool {
        self.group.is_some()
    }

    fn open_group(&mut self, frame: FrameIndex) {
        put_u32(&mut self.data, frame.0);
        let count_at = self.data.len();
        put_u32(&mut self.data, 0);
        self.frame_count += 1;
        self.group = Some(OpenGroup { count_at, count: 0 });
    }

    fn push(&mut self, record: &OperationRecord) {
        record.encode_into(&mut self.data);
        if let Some(group) = &mut self.group {
            group.count += 1;
        }
    }

    fn close_group(&mut self) {
        if let Some(group) = self.group.take() {
            patch_u32(&mut self.data, group.count_at, group.count);
        }
    }

    fn finish(&mut self, continuation: Continuation) -> PacketBody {
        self.close_group();
        let done = std::mem::take(self);
        PacketBody {
            continuation,
            frame_count: done.frame_count,
            frame_data: done.data,
        }
    }
}
