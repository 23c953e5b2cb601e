// Error types for the round core and its configuration.
//
// All round failures are local to the round: callers log them and carry
// on. Nothing here is fatal to the process.

use std::io;

use lockstep_protocol::{DecodeError, PlayerId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoundError {
    #[error("round needs {required} players, {seated} seated")]
    WrongPlayerCount { required: usize, seated: usize },

    #[error("player {0} is already seated")]
    DuplicatePlayer(PlayerId),

    #[error("player id 0 is reserved for system records")]
    ReservedPlayerId,

    #[error("nickname of {len} bytes exceeds the {max}-byte limit")]
    NicknameTooLong { len: usize, max: usize },

    #[error("table already has all {0} seats taken")]
    TableFull(usize),

    #[error("player {0} is not seated at this table")]
    UnknownPlayer(PlayerId),

    #[error("seating is locked while a round is in progress")]
    PlayersLocked,

    #[error("operation payload of {len} bytes exceeds the {max}-byte limit")]
    OversizedPayload { len: usize, max: usize },

    #[error("malformed operation batch: {0}")]
    MalformedBatch(#[from] DecodeError),

    #[error("round is not active")]
    NotActive,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
