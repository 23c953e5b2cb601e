// Length-delimited message framing over TCP.
//
// A frame is a 4-byte big-endian length prefix followed by one encoded
// message (`message.rs`). Two ways in:
// - `frame_payload` builds a complete framed buffer in memory. The relay
//   uses this for every outbound packet so the byte count checked against
//   the packet budget is exactly what goes on the wire.
// - `write_message` / `read_message` stream frames over any `Write`/`Read`.
//
// `MAX_MESSAGE_SIZE` guards reads against unbounded allocation from a
// malformed or hostile length prefix.

use std::io::{self, Read, Write};

use crate::codec::len_u32;

/// Size of the length prefix in front of every message.
pub const LEN_PREFIX: usize = 4;

/// Maximum allowed message size (1 MB). Operation packets are bounded by the
/// relay's packet budget (a few KB); this only has to stop garbage prefixes.
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Prefix `msg` with its length, producing the exact bytes sent on the wire.
pub fn frame_payload(msg: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_PREFIX + msg.len());
    out.extend_from_slice(&len_u32(msg.len()).to_be_bytes());
    out.extend_from_slice(msg);
    out
}

/// Write a length-delimited message: 4-byte big-endian length, then payload.
pub fn write_message<W: Write>(writer: &mut W, msg: &[u8]) -> io::Result<()> {
    let len = msg.len();
    if len > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    writer.write_all(&frame_payload(msg))?;
    writer.flush()?;
    Ok(())
}

/// Read a length-delimited message: 4-byte big-endian length, then payload.
///
/// Returns `UnexpectedEof` if the stream closes before or during a message.
/// Returns `InvalidData` if the length exceeds `MAX_MESSAGE_SIZE`.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; LEN_PREFIX];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn framed_payload_reads_back() {
        let framed = frame_payload(b"frame data");
        assert_eq!(framed.len(), LEN_PREFIX + 10);
        assert_eq!(&framed[..LEN_PREFIX], &[0, 0, 0, 10]);

        let mut cursor = Cursor::new(&framed);
        assert_eq!(read_message(&mut cursor).unwrap(), b"frame data");
    }

    #[test]
    fn empty_message() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"").unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);

        let mut cursor = Cursor::new(&buf);
        assert!(read_message(&mut cursor).unwrap().is_empty());
    }

    #[test]
    fn rejects_oversized_write() {
        let big = vec![0u8; MAX_MESSAGE_SIZE as usize + 1];
        let mut buf = Vec::new();
        let err = write_message(&mut buf, &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_read() {
        let fake_len = (MAX_MESSAGE_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(fake_len.to_vec());
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_unexpected_eof_mid_payload() {
        let mut framed = frame_payload(b"truncated");
        framed.truncate(framed.len() - 3);
        let mut cursor = Cursor::new(framed);
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn back_to_back_frames() {
        let mut buf = Vec::new();
        for msg in [&b"first"[..], b"second", b"third"] {
            write_message(&mut buf, msg).unwrap();
        }
        let mut cursor = Cursor::new(&buf);
        assert_eq!(read_message(&mut cursor).unwrap(), b"first");
        assert_eq!(read_message(&mut cursor).unwrap(), b"second");
        assert_eq!(read_message(&mut cursor).unwrap(), b"third");
    }
}
