// Low-level binary encoding and the frame-group layout.
//
// All integers are little-endian, fixed width. Variable-length data (payloads,
// nicknames) is always prefixed with an explicit `u32` length; nothing is
// inferred from the surrounding buffer.
//
// Two record layouts live here:
// - **Broadcast records** (`OperationRecord`), as they appear inside an
//   operations packet: `[owner u32][op_type u32][len u32][payload]`, grouped
//   under frame-group headers `[frame_index u32][record_count u32]`.
// - **Submitted operations** (`SubmittedOp`), as a client sends them: the
//   same minus the owner field, which the relay fills in from the sender.
//
// `Reader` is a bounds-checked cursor over a borrowed slice; the `put_*`
// helpers append to a `Vec<u8>`. The packetizer in `lockstep_relay` writes
// frame groups with these helpers and back-patches record counts with
// `patch_u32`.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::DecodeError;
use crate::types::{FrameIndex, OpType, PlayerId};

/// `[frame_index u32][record_count u32]`
pub const GROUP_HEADER_LEN: usize = 8;

/// `[owner u32][op_type u32][payload_len u32]`
pub const RECORD_HEADER_LEN: usize = 12;

/// `[op_type u32][payload_len u32]`
pub const SUBMITTED_OP_HEADER_LEN: usize = 8;

pub fn put_u16(buf: &mut Vec<u8>, value: u16) {
    let mut bytes = [0u8; 2];
    LittleEndian::write_u16(&mut bytes, value);
    buf.extend_from_slice(&bytes);
}

pub fn put_u32(buf: &mut Vec<u8>, value: u32) {
    let mut bytes = [0u8; 4];
    LittleEndian::write_u32(&mut bytes, value);
    buf.extend_from_slice(&bytes);
}

pub fn put_u64(buf: &mut Vec<u8>, value: u64) {
    let mut bytes = [0u8; 8];
    LittleEndian::write_u64(&mut bytes, value);
    buf.extend_from_slice(&bytes);
}

/// Length-prefixed byte string.
pub fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(buf, len_u32(bytes.len()));
    buf.extend_from_slice(bytes);
}

pub fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

/// Overwrite a previously written `u32` at byte offset `at`.
///
/// Panics if `at + 4` is past the end of `buf`; callers only patch offsets
/// they wrote themselves.
pub fn patch_u32(buf: &mut [u8], at: usize, value: u32) {
    LittleEndian::write_u32(&mut buf[at..at + 4], value);
}

/// Lengths on the wire are `u32`. Buffers handled here are bounded by the
/// packet budget and `MAX_MESSAGE_SIZE`, far below `u32::MAX`.
pub fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Bounds-checked little-endian reader over a borrowed slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.take(2).map(LittleEndian::read_u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.take(4).map(LittleEndian::read_u32)
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.take(8).map(LittleEndian::read_u64)
    }

    /// Length-prefixed byte string.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Fails if any bytes are left unread.
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

/// One typed operation owned by a player (or by the system, owner 0).
/// The payload is opaque to the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationRecord {
    pub owner: PlayerId,
    pub op_type: OpType,
    pub payload: Vec<u8>,
}

impl OperationRecord {
    pub fn new(owner: PlayerId, op_type: OpType, payload: Vec<u8>) -> Self {
        Self {
            owner,
            op_type,
            payload,
        }
    }

    /// Exact number of bytes `encode_into` appends.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.payload.len()
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        put_u32(buf, self.owner.0);
        put_u32(buf, self.op_type.0);
        put_bytes(buf, &self.payload);
    }

    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let owner = PlayerId(reader.read_u32()?);
        let op_type = OpType(reader.read_u32()?);
        let payload = reader.read_bytes()?.to_vec();
        Ok(Self {
            owner,
            op_type,
            payload,
        })
    }
}

/// All records of one frame index inside a single packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameGroup {
    pub frame: FrameIndex,
    pub records: Vec<OperationRecord>,
}

/// Decode the frame-data section of an operations packet. `declared` is the
/// packet's frame-group count; a mismatch is an error.
pub fn decode_frame_groups(data: &[u8], declared: u32) -> Result<Vec<FrameGroup>, DecodeError> {
    let mut reader = Reader::new(data);
    let mut groups = Vec::new();
    while !reader.is_empty() {
        let frame = FrameIndex(reader.read_u32()?);
        let count = reader.read_u32()?;
        let mut records = Vec::new();
        for _ in 0..count {
            records.push(OperationRecord::decode(&mut reader)?);
        }
        groups.push(FrameGroup { frame, records });
    }
    let found = len_u32(groups.len());
    if found != declared {
        return Err(DecodeError::GroupCountMismatch { declared, found });
    }
    Ok(groups)
}

/// One client-submitted operation; the owner is implied by the sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmittedOp {
    pub op_type: OpType,
    pub payload: Vec<u8>,
}

/// Encode a client's operation stream (the `data` of `ClientMessage::Ops`).
pub fn encode_submitted_ops(ops: &[SubmittedOp]) -> Vec<u8> {
    let mut buf = Vec::new();
    for op in ops {
        put_u32(&mut buf, op.op_type.0);
        put_bytes(&mut buf, &op.payload);
    }
    buf
}

/// Decode exactly `count` submitted operations from `data`. The stream must
/// be consumed completely: a short stream and trailing bytes both mean the
/// declared count disagrees with the data.
pub fn decode_submitted_ops(count: u32, data: &[u8]) -> Result<Vec<SubmittedOp>, DecodeError> {
    let mut reader = Reader::new(data);
    let mut ops = Vec::new();
    for _ in 0..count {
        let op_type = OpType(reader.read_u32()?);
        let payload = reader.read_bytes()?.to_vec();
        ops.push(SubmittedOp { op_type, payload });
    }
    reader.finish()?;
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_bytes(frame: u32, records: &[OperationRecord]) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u32(&mut buf, frame);
        put_u32(&mut buf, len_u32(records.len()));
        for r in records {
            r.encode_into(&mut buf);
        }
        buf
    }

    #[test]
    fn record_layout_is_owner_type_len_payload() {
        let record = OperationRecord::new(PlayerId(7), OpType(42), vec![0xAA, 0xBB]);
        let mut buf = Vec::new();
        record.encode_into(&mut buf);
        assert_eq!(
            buf,
            vec![7, 0, 0, 0, 42, 0, 0, 0, 2, 0, 0, 0, 0xAA, 0xBB]
        );
        assert_eq!(record.encoded_len(), buf.len());
    }

    #[test]
    fn decode_two_frame_groups() {
        let a = OperationRecord::new(PlayerId(1), OpType(10), vec![1]);
        let b = OperationRecord::new(PlayerId(2), OpType(11), vec![]);
        let mut data = group_bytes(5, &[a.clone(), b.clone()]);
        data.extend(group_bytes(9, std::slice::from_ref(&a)));

        let groups = decode_frame_groups(&data, 2).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].frame, FrameIndex(5));
        assert_eq!(groups[0].records, vec![a.clone(), b]);
        assert_eq!(groups[1].frame, FrameIndex(9));
        assert_eq!(groups[1].records, vec![a]);
    }

    #[test]
    fn decode_frame_groups_rejects_wrong_group_count() {
        let data = group_bytes(1, &[]);
        let err = decode_frame_groups(&data, 3).unwrap_err();
        assert_eq!(
            err,
            DecodeError::GroupCountMismatch {
                declared: 3,
                found: 1
            }
        );
    }

    #[test]
    fn decode_frame_groups_rejects_truncated_record() {
        let record = OperationRecord::new(PlayerId(1), OpType(10), vec![1, 2, 3]);
        let mut data = group_bytes(1, &[record]);
        data.truncate(data.len() - 1);
        assert!(matches!(
            decode_frame_groups(&data, 1),
            Err(DecodeError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn submitted_ops_decode_in_order() {
        let ops = vec![
            SubmittedOp {
                op_type: OpType(100),
                payload: vec![1, 2, 3],
            },
            SubmittedOp {
                op_type: OpType(101),
                payload: vec![],
            },
        ];
        let data = encode_submitted_ops(&ops);
        assert_eq!(data.len(), 2 * SUBMITTED_OP_HEADER_LEN + 3);
        assert_eq!(decode_submitted_ops(2, &data).unwrap(), ops);
    }

    #[test]
    fn submitted_ops_count_larger_than_stream() {
        let data = encode_submitted_ops(&[SubmittedOp {
            op_type: OpType(100),
            payload: vec![9],
        }]);
        assert!(matches!(
            decode_submitted_ops(2, &data),
            Err(DecodeError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn submitted_ops_count_smaller_than_stream() {
        let data = encode_submitted_ops(&[
            SubmittedOp {
                op_type: OpType(100),
                payload: vec![9],
            },
            SubmittedOp {
                op_type: OpType(100),
                payload: vec![8],
            },
        ]);
        assert_eq!(
            decode_submitted_ops(1, &data),
            Err(DecodeError::TrailingBytes(SUBMITTED_OP_HEADER_LEN + 1))
        );
    }

    #[test]
    fn payload_length_beyond_stream_is_rejected() {
        let mut data = Vec::new();
        put_u32(&mut data, 100);
        put_u32(&mut data, 1_000_000);
        data.extend_from_slice(&[0; 4]);
        assert_eq!(
            decode_submitted_ops(1, &data),
            Err(DecodeError::UnexpectedEof {
                needed: 1_000_000,
                remaining: 4
            })
        );
    }

    #[test]
    fn patch_u32_overwrites_in_place() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 1);
        put_u32(&mut buf, 0);
        patch_u32(&mut buf, 4, 0xDEAD_BEEF);
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_u32().unwrap(), 1);
        assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BEEF);
        reader.finish().unwrap();
    }

    #[test]
    fn read_string_rejects_invalid_utf8() {
        let mut buf = Vec::new();
        put_bytes(&mut buf, &[0xFF, 0xFE]);
        assert_eq!(
            Reader::new(&buf).read_string(),
            Err(DecodeError::InvalidUtf8)
        );
    }
}
