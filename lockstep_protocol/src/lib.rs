// lockstep_protocol — binary wire protocol for the lockstep round relay.
//
// Shared by the relay (`lockstep_relay`) and game clients. No dependency on
// any game rules: operations are opaque typed byte payloads.
//
// Module overview:
// - `types.rs`:    ID newtypes — `PlayerId`, `FrameIndex`, `OpType`, `RoundId`.
// - `codec.rs`:    Little-endian primitives, `OperationRecord`, the
//                  frame-group layout, and submitted-op decoding.
// - `message.rs`:  `ClientMessage` / `ServerMessage`, `OpsPacket`, and the
//                  `RoundStartOp` system payload.
// - `framing.rs`:  4-byte big-endian length prefix over `Read`/`Write`.
// - `error.rs`:    `DecodeError`.
//
// Design decisions:
// - **Binary, not JSON.** Operation packets are budgeted in bytes; every
//   length is explicit so the relay can compute exact encoded sizes before
//   writing.
// - **No async runtime.** Framing works on `std::io` streams, compatible with
//   blocking TCP and in-memory buffers alike.

pub mod codec;
pub mod error;
pub mod framing;
pub mod message;
pub mod types;

pub use codec::{FrameGroup, OperationRecord, SubmittedOp};
pub use error::DecodeError;
pub use framing::{MAX_MESSAGE_SIZE, read_message, write_message};
pub use message::{
    ClientMessage, Continuation, OPS_PACKET_OVERHEAD, OpsPacket, RoundStartOp, SeatAssignment,
    ServerMessage,
};
pub use types::{FrameIndex, OpType, PlayerId, RoundId};

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Frame a ServerMessage, read it back through the framing layer, decode.
    fn server_over_wire(msg: &ServerMessage) -> ServerMessage {
        let wire = msg.to_frame();
        let mut cursor = Cursor::new(&wire);
        let body = read_message(&mut cursor).unwrap();
        ServerMessage::decode(&body).unwrap()
    }

    #[test]
    fn hello_over_wire() {
        let hello = ClientMessage::Hello {
            player_id: PlayerId(1001),
            nickname: "Mallory".into(),
            gold: 5_000,
        };
        let mut wire = Vec::new();
        write_message(&mut wire, &hello.encode()).unwrap();
        let body = read_message(&mut Cursor::new(&wire)).unwrap();
        assert_eq!(ClientMessage::decode(&body).unwrap(), hello);
    }

    #[test]
    fn ops_submission_carries_raw_stream() {
        let data = codec::encode_submitted_ops(&[SubmittedOp {
            op_type: OpType(200),
            payload: vec![4, 5, 6],
        }]);
        let msg = ClientMessage::Ops {
            frame_index: FrameIndex(12),
            op_count: 1,
            data: data.clone(),
        };
        match ClientMessage::decode(&msg.encode()).unwrap() {
            ClientMessage::Ops {
                frame_index,
                op_count,
                data: decoded,
            } => {
                assert_eq!(frame_index, FrameIndex(12));
                assert_eq!(op_count, 1);
                assert_eq!(decoded, data);
            }
            other => panic!("expected Ops, got {other:?}"),
        }
    }

    #[test]
    fn empty_ops_packet_is_exactly_the_overhead() {
        let packet = ServerMessage::Ops(OpsPacket {
            player_id: PlayerId(3),
            continuation: Continuation::Final,
            frame_count: 0,
            frame_data: Vec::new(),
        });
        assert_eq!(packet.to_frame().len(), OPS_PACKET_OVERHEAD);
    }

    #[test]
    fn ops_packet_keeps_continuation_flag() {
        let packet = OpsPacket {
            player_id: PlayerId(3),
            continuation: Continuation::More,
            frame_count: 2,
            frame_data: vec![1, 2, 3, 4],
        };
        assert_eq!(
            server_over_wire(&ServerMessage::Ops(packet.clone())),
            ServerMessage::Ops(packet)
        );
    }

    #[test]
    fn invalid_continuation_flag_rejected() {
        let mut body = ServerMessage::Ops(OpsPacket {
            player_id: PlayerId(3),
            continuation: Continuation::Final,
            frame_count: 0,
            frame_data: Vec::new(),
        })
        .encode();
        // kind(2) + player(4), then the flag.
        body[6] = 7;
        assert_eq!(
            ServerMessage::decode(&body),
            Err(DecodeError::InvalidFlag(7))
        );
    }

    #[test]
    fn notices_over_wire() {
        for msg in [
            ServerMessage::RoundStart {
                player_id: PlayerId(8),
            },
            ServerMessage::RoundEnd {
                player_id: PlayerId(8),
            },
            ServerMessage::Rejected {
                reason: "table is full".into(),
            },
        ] {
            assert_eq!(server_over_wire(&msg), msg);
        }
    }

    #[test]
    fn client_kind_does_not_decode_as_server_message() {
        let body = ClientMessage::Ready.encode();
        assert_eq!(
            ServerMessage::decode(&body),
            Err(DecodeError::UnknownMessage(3))
        );
    }

    #[test]
    fn trailing_garbage_rejected() {
        let mut body = ClientMessage::Goodbye.encode();
        body.push(0);
        assert_eq!(
            ClientMessage::decode(&body),
            Err(DecodeError::TrailingBytes(1))
        );
    }

    #[test]
    fn round_start_payload_lists_seats_in_order() {
        let op = RoundStartOp {
            seats: vec![
                SeatAssignment {
                    player_id: PlayerId(11),
                    seat: 0,
                    nickname: "north".into(),
                    gold: 100,
                },
                SeatAssignment {
                    player_id: PlayerId(22),
                    seat: 1,
                    nickname: "south".into(),
                    gold: 250,
                },
            ],
        };
        let encoded = op.encode();
        assert_eq!(encoded.len(), RoundStartOp::encoded_len(2, 5));
        let decoded = RoundStartOp::decode(&encoded).unwrap();
        assert_eq!(decoded, op);
        assert_eq!(decoded.seats[1].seat, 1);
    }
}
