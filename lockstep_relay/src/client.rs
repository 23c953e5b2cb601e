// TCP client for connecting to a lockstep table server.
//
// Provides a non-blocking interface for a game loop to talk to the relay.
// Architecture:
// - `connect()` performs TCP connect + Hello handshake on the calling thread,
//   then spawns a background reader thread.
// - The reader thread calls `read_message()` in a loop, decodes
//   `ServerMessage`, and pushes into an `mpsc` channel.
// - The caller holds a `BufWriter<TcpStream>` for sending.
// - `poll()` drains the inbox non-blocking; `recv_timeout()` waits for one
//   message.
//
// `OpsStream` reassembles the operation packets of one flush or catch-up:
// it collects frame groups until a `Final` packet arrives.
//
// Used by the integration tests and by any Rust client embedding the relay
// protocol.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lockstep_protocol::codec::{decode_frame_groups, encode_submitted_ops, len_u32};
use lockstep_protocol::{
    ClientMessage, Continuation, DecodeError, FrameGroup, FrameIndex, OpsPacket, PlayerId,
    ServerMessage, SubmittedOp, read_message, write_message,
};
use tracing::debug;

/// Information returned by a successful `connect()` handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WelcomeInfo {
    pub player_id: PlayerId,
    pub required_players: u32,
}

/// TCP client for relay communication.
pub struct NetClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerMessage>,
    _reader_thread: Option<JoinHandle<()>>,
    player_id: PlayerId,
}

impl NetClient {
    /// Connect to a relay, perform the Hello handshake, and spawn a reader
    /// thread. Returns the client and welcome info on success.
    pub fn connect(
        addr: SocketAddr,
        player_id: PlayerId,
        nickname: &str,
        gold: u64,
    ) -> Result<(Self, WelcomeInfo), String> {
        let stream = TcpStream::connect(addr).map_err(|e| format!("connect failed: {e}"))?;
        stream.set_read_timeout(Some(Duration::from_secs(5))).ok();

        let reader_stream = stream
            .try_clone()
            .map_err(|e| format!("clone failed: {e}"))?;
        let mut writer = BufWriter::new(stream);

        let hello = ClientMessage::Hello {
            player_id,
            nickname: nickname.into(),
            gold,
        };
        send_msg(&mut writer, &hello).map_err(|e| format!("send Hello failed: {e}"))?;

        let mut reader = BufReader::new(reader_stream);
        let response_bytes =
            read_message(&mut reader).map_err(|e| format!("read Welcome failed: {e}"))?;
        let response = ServerMessage::decode(&response_bytes)
            .map_err(|e| format!("parse Welcome failed: {e}"))?;

        let welcome_info = match response {
            ServerMessage::Welcome {
                player_id,
                required_players,
            } => WelcomeInfo {
                player_id,
                required_players,
            },
            ServerMessage::Rejected { reason } => {
                return Err(format!("rejected: {reason}"));
            }
            other => {
                return Err(format!("unexpected response: {other:?}"));
            }
        };

        // Clear the read timeout for the long-lived reader loop.
        reader.get_ref().set_read_timeout(None).ok();

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || {
            reader_loop(reader, tx);
        });

        Ok((
            Self {
                writer,
                inbox: rx,
                _reader_thread: Some(reader_thread),
                player_id,
            },
            welcome_info,
        ))
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Tell the relay this client has loaded the round.
    pub fn send_ready(&mut self) -> Result<(), String> {
        send_msg(&mut self.writer, &ClientMessage::Ready)
            .map_err(|e| format!("send Ready failed: {e}"))
    }

    /// Submit a batch of operations for `frame`.
    pub fn send_ops(&mut self, frame: FrameIndex, ops: &[SubmittedOp]) -> Result<(), String> {
        let msg = ClientMessage::Ops {
            frame_index: frame,
            op_count: len_u32(ops.len()),
            data: encode_submitted_ops(ops),
        };
        send_msg(&mut self.writer, &msg).map_err(|e| format!("send Ops failed: {e}"))
    }

    /// Ask for a seat in the next round.
    pub fn send_join(&mut self) -> Result<(), String> {
        send_msg(&mut self.writer, &ClientMessage::Join)
            .map_err(|e| format!("send Join failed: {e}"))
    }

    /// Send Goodbye. The relay closes its side afterwards.
    pub fn disconnect(&mut self) {
        let _ = send_msg(&mut self.writer, &ClientMessage::Goodbye);
    }

    /// Drain all queued server messages (non-blocking).
    pub fn poll(&self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.inbox.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// Wait up to `timeout` for the next server message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ServerMessage> {
        self.inbox.recv_timeout(timeout).ok()
    }
}

/// Encode a `ClientMessage` and write it with length-prefixed framing.
fn send_msg(writer: &mut BufWriter<TcpStream>, msg: &ClientMessage) -> std::io::Result<()> {
    write_message(writer, &msg.encode())
}

/// Reader thread: read framed messages in a loop, push to channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ServerMessage>) {
    while let Ok(bytes) = read_message(&mut reader) {
        match ServerMessage::decode(&bytes) {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break; // Receiver dropped
                }
            }
            Err(e) => {
                debug!(error = %e, "malformed server message");
                break;
            }
        }
    }
}

/// Reassembles one multi-packet operation stream.
#[derive(Debug, Default)]
pub struct OpsStream {
    groups: Vec<FrameGroup>,
}

impl OpsStream {
    /// Feed one packet. Returns every frame group of the stream once the
    /// `Final` packet arrives.
    pub fn push(&mut self, packet: &OpsPacket) -> Result<Option<Vec<FrameGroup>>, DecodeError> {
        let groups = decode_frame_groups(&packet.frame_data, packet.frame_count)?;
        self.groups.extend(groups);
        match packet.continuation {
            Continuation::More => Ok(None),
            Continuation::Final => Ok(Some(std::mem::take(&mut self.groups))),
        }
    }
}

#[cfg(test)]
mod tests {
    use lockstep_protocol::{OpType, OperationRecord};

    use super::*;
    use crate::oplog::OperationLog;
    use crate::packetizer::Packetizer;

    #[test]
    fn ops_stream_completes_on_final_packet() {
        let mut log = OperationLog::new();
        for seq in 0..6 {
            log.push(
                FrameIndex(3),
                OperationRecord::new(PlayerId(1), OpType(seq), vec![1; 40]),
            );
        }
        let mut packets = Vec::new();
        Packetizer::new(120).packetize(&log, |body| {
            packets.push(OpsPacket {
                player_id: PlayerId(1),
                continuation: body.continuation,
                frame_count: body.frame_count,
                frame_data: body.frame_data,
            });
        });
        assert!(packets.len() > 1);

        let mut stream = OpsStream::default();
        let (last, rest) = packets.split_last().unwrap();
        for packet in rest {
            assert_eq!(stream.push(packet).unwrap(), None);
        }
        let groups = stream.push(last).unwrap().unwrap();
        let records: Vec<OperationRecord> =
            groups.into_iter().flat_map(|g| g.records).collect();
        assert_eq!(records, log.get(FrameIndex(3)).unwrap().records());

        // The stream resets for the next flush.
        assert!(stream.groups.is_empty());
    }
}
