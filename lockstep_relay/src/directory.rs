// The round's view of the player-management layer.
//
// A `Round` never owns player sessions or sockets. Everything it needs to
// know about a player beyond its seat (online state, last reported frame)
// and everything it does to one (send bytes, reset per-round data, settle)
// goes through this trait, addressed by `PlayerId`.
//
// `server.rs` implements it over TCP connections (`TcpDirectory`); the round
// tests implement it in memory and decode whatever is sent.

use std::io;

use lockstep_protocol::{FrameIndex, PlayerId};

pub trait PlayerDirectory {
    fn is_online(&self, player: PlayerId) -> bool;

    /// Frame index of the player's most recent submission.
    fn last_frame(&self, player: PlayerId) -> FrameIndex;

    fn set_online(&mut self, player: PlayerId);

    /// Clear per-round transient data at the start of a round.
    fn reset_round_data(&mut self, player: PlayerId);

    /// Deliver one complete framed buffer. Fire-and-forget from the round's
    /// point of view: errors are logged, never retried.
    fn send_to(&mut self, player: PlayerId, bytes: &[u8]) -> io::Result<()>;

    /// End-of-round settlement hook, called once per seated player.
    fn settle(&mut self, player: PlayerId);
}
