// Protocol messages for client-relay communication.
//
// Two enums define the full protocol vocabulary:
// - `ClientMessage`: sent by game clients to the relay.
// - `ServerMessage`: sent by the relay to game clients.
//
// Every message encodes as `[kind u16][fields...]` using the primitives in
// `codec.rs`, and travels inside one length-prefixed frame (`framing.rs`).
// Kinds 1..=99 are client messages, 100.. are server messages, so a stray
// message sent the wrong way decodes as `UnknownMessage`.
//
// The operations broadcast (`OpsPacket`) carries the frame-group stream
// produced by the relay's packetizer. Its fixed part is exactly
// `OPS_PACKET_OVERHEAD` bytes once framed, which the relay's config
// validation uses to make sure a full packet never exceeds its budget.
//
// `RoundStartOp` is the payload of the system `ROUND_START` record: the
// final seating of the round, replayed to every client so they can build the
// same initial state.

use crate::codec::{Reader, len_u32, put_bytes, put_str, put_u16, put_u32, put_u64};
use crate::error::DecodeError;
use crate::framing::{LEN_PREFIX, frame_payload};
use crate::types::{FrameIndex, PlayerId};

const KIND_HELLO: u16 = 1;
const KIND_JOIN: u16 = 2;
const KIND_READY: u16 = 3;
const KIND_OPS: u16 = 4;
const KIND_GOODBYE: u16 = 5;

const KIND_WELCOME: u16 = 100;
const KIND_REJECTED: u16 = 101;
const KIND_ROUND_START: u16 = 102;
const KIND_ROUND_END: u16 = 103;
const KIND_OPS_BROADCAST: u16 = 104;

/// Framed size of an `OpsPacket` with empty frame data:
/// prefix + kind + player + flag + frame count + frame length.
pub const OPS_PACKET_OVERHEAD: usize = LEN_PREFIX + 2 + 4 * 4;

/// Messages sent by a client to the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// Identify this connection and take a seat at the table.
    Hello {
        player_id: PlayerId,
        nickname: String,
        gold: u64,
    },
    /// Ask for a seat in the next round (after the previous one ended).
    Join,
    /// Client finished loading after a round-start notice.
    Ready,
    /// A batch of operations for one frame. `data` holds `op_count`
    /// submitted-op entries (see `codec::decode_submitted_ops`).
    Ops {
        frame_index: FrameIndex,
        op_count: u32,
        data: Vec<u8>,
    },
    /// Player is leaving gracefully.
    Goodbye,
}

/// Messages sent by the relay to a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    /// Hello accepted.
    Welcome {
        player_id: PlayerId,
        required_players: u32,
    },
    /// Hello or Join refused.
    Rejected { reason: String },
    /// A round started (or, for a reconnecting player, is in progress).
    RoundStart { player_id: PlayerId },
    /// The round ended.
    RoundEnd { player_id: PlayerId },
    /// One packet of the operation stream.
    Ops(OpsPacket),
}

/// Whether more packets of the same flush/catch-up follow this one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Continuation {
    More,
    Final,
}

impl Continuation {
    fn to_wire(self) -> u32 {
        match self {
            Continuation::More => 0,
            Continuation::Final => 1,
        }
    }

    fn from_wire(flag: u32) -> Result<Self, DecodeError> {
        match flag {
            0 => Ok(Continuation::More),
            1 => Ok(Continuation::Final),
            other => Err(DecodeError::InvalidFlag(other)),
        }
    }
}

/// An operations broadcast packet. `player_id` is the addressee; the rest
/// of the content is identical for every recipient of the same packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpsPacket {
    pub player_id: PlayerId,
    pub continuation: Continuation,
    pub frame_count: u32,
    pub frame_data: Vec<u8>,
}

impl OpsPacket {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        put_u16(buf, KIND_OPS_BROADCAST);
        put_u32(buf, self.player_id.0);
        put_u32(buf, self.continuation.to_wire());
        put_u32(buf, self.frame_count);
        put_bytes(buf, &self.frame_data);
    }

    /// Encode as a `ServerMessage::Ops` and length-prefix, without moving
    /// the packet into the enum. The relay re-addresses one packet to many
    /// recipients this way.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(OPS_PACKET_OVERHEAD + self.frame_data.len());
        self.encode_into(&mut buf);
        frame_payload(&buf)
    }
}

impl ClientMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            ClientMessage::Hello {
                player_id,
                nickname,
                gold,
            } => {
                put_u16(&mut buf, KIND_HELLO);
                put_u32(&mut buf, player_id.0);
                put_str(&mut buf, nickname);
                put_u64(&mut buf, *gold);
            }
            ClientMessage::Join => put_u16(&mut buf, KIND_JOIN),
            ClientMessage::Ready => put_u16(&mut buf, KIND_READY),
            ClientMessage::Ops {
                frame_index,
                op_count,
                data,
            } => {
                put_u16(&mut buf, KIND_OPS);
                put_u32(&mut buf, frame_index.0);
                put_u32(&mut buf, *op_count);
                put_bytes(&mut buf, data);
            }
            ClientMessage::Goodbye => put_u16(&mut buf, KIND_GOODBYE),
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let msg = match reader.read_u16()? {
            KIND_HELLO => ClientMessage::Hello {
                player_id: PlayerId(reader.read_u32()?),
                nickname: reader.read_string()?,
                gold: reader.read_u64()?,
            },
            KIND_JOIN => ClientMessage::Join,
            KIND_READY => ClientMessage::Ready,
            KIND_OPS => ClientMessage::Ops {
                frame_index: FrameIndex(reader.read_u32()?),
                op_count: reader.read_u32()?,
                data: reader.read_bytes()?.to_vec(),
            },
            KIND_GOODBYE => ClientMessage::Goodbye,
            other => return Err(DecodeError::UnknownMessage(other)),
        };
        reader.finish()?;
        Ok(msg)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            ServerMessage::Welcome {
                player_id,
                required_players,
            } => {
                put_u16(&mut buf, KIND_WELCOME);
                put_u32(&mut buf, player_id.0);
                put_u32(&mut buf, *required_players);
            }
            ServerMessage::Rejected { reason } => {
                put_u16(&mut buf, KIND_REJECTED);
                put_str(&mut buf, reason);
            }
            ServerMessage::RoundStart { player_id } => {
                put_u16(&mut buf, KIND_ROUND_START);
                put_u32(&mut buf, player_id.0);
            }
            ServerMessage::RoundEnd { player_id } => {
                put_u16(&mut buf, KIND_ROUND_END);
                put_u32(&mut buf, player_id.0);
            }
            ServerMessage::Ops(packet) => packet.encode_into(&mut buf),
        }
        buf
    }

    /// Encode and length-prefix: the exact bytes handed to the transport.
    pub fn to_frame(&self) -> Vec<u8> {
        frame_payload(&self.encode())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let msg = match reader.read_u16()? {
            KIND_WELCOME => ServerMessage::Welcome {
                player_id: PlayerId(reader.read_u32()?),
                required_players: reader.read_u32()?,
            },
            KIND_REJECTED => ServerMessage::Rejected {
                reason: reader.read_string()?,
            },
            KIND_ROUND_START => ServerMessage::RoundStart {
                player_id: PlayerId(reader.read_u32()?),
            },
            KIND_ROUND_END => ServerMessage::RoundEnd {
                player_id: PlayerId(reader.read_u32()?),
            },
            KIND_OPS_BROADCAST => ServerMessage::Ops(OpsPacket {
                player_id: PlayerId(reader.read_u32()?),
                continuation: Continuation::from_wire(reader.read_u32()?)?,
                frame_count: reader.read_u32()?,
                frame_data: reader.read_bytes()?.to_vec(),
            }),
            other => return Err(DecodeError::UnknownMessage(other)),
        };
        reader.finish()?;
        Ok(msg)
    }
}

/// One seat in the `ROUND_START` system record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeatAssignment {
    pub player_id: PlayerId,
    pub seat: u16,
    pub nickname: String,
    pub gold: u64,
}

/// `[player u32][seat u16][nickname len u32][gold u64]`, nickname bytes aside.
const SEAT_FIXED_LEN: usize = 4 + 2 + 4 + 8;

/// Payload of the `ROUND_START` system record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundStartOp {
    pub seats: Vec<SeatAssignment>,
}

impl RoundStartOp {
    /// Encoded size of a payload with `seats` entries whose nicknames are
    /// each `nickname_len` bytes long.
    pub fn encoded_len(seats: usize, nickname_len: usize) -> usize {
        seats
            .saturating_mul(SEAT_FIXED_LEN.saturating_add(nickname_len))
            .saturating_add(4)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u32(&mut buf, len_u32(self.seats.len()));
        for seat in &self.seats {
            put_u32(&mut buf, seat.player_id.0);
            put_u16(&mut buf, seat.seat);
            put_str(&mut buf, &seat.nickname);
            put_u64(&mut buf, seat.gold);
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let count = reader.read_u32()?;
        let mut seats = Vec::new();
        for _ in 0..count {
            seats.push(SeatAssignment {
                player_id: PlayerId(reader.read_u32()?),
                seat: reader.read_u16()?,
                nickname: reader.read_string()?,
                gold: reader.read_u64()?,
            });
        }
        reader.finish()?;
        Ok(Self { seats })
    }
}
