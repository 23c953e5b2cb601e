// Core ID types for the lockstep protocol.
//
// Lightweight newtypes shared by `message.rs`, `codec.rs` and the relay's
// round core (`lockstep_relay::round`). All of them are `u32`/`u64` on the
// wire. Frame indices are assigned by the producing client, never by the
// relay.

use std::fmt;

/// Player identity as assigned by the account/matchmaking layer.
/// `PlayerId::SYSTEM` (0) tags records the relay itself originates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

impl PlayerId {
    pub const SYSTEM: PlayerId = PlayerId(0);
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Simulation step at which a batch of operations happened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameIndex(pub u32);

/// Operation type tag. The relay treats every value as opaque except for
/// the reserved system types below.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpType(pub u32);

impl OpType {
    /// Seating/identity assignment, emitted once when the round goes active.
    pub const ROUND_START: OpType = OpType(1);
    /// A player left (disconnected or said goodbye).
    pub const PLAYER_LEAVE: OpType = OpType(2);
    /// A player came back and was replayed the history.
    pub const PLAYER_RECONNECT: OpType = OpType(3);
}

/// Externally assigned round identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundId(pub u64);

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
