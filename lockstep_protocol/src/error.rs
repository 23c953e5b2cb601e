// Decode errors for the binary wire format.
//
// Every decoder in `codec.rs` and `message.rs` returns `DecodeError` rather
// than panicking: all inbound bytes come from untrusted clients.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("{0} trailing bytes after declared content")]
    TrailingBytes(usize),

    #[error("unknown message kind {0}")]
    UnknownMessage(u16),

    #[error("invalid continuation flag {0}")]
    InvalidFlag(u32),

    #[error("declared {declared} frame groups, found {found}")]
    GroupCountMismatch { declared: u32, found: u32 },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}
