// lockstep_relay — per-table round relay for lockstep multiplayer games.
//
// The relay is authoritative over operation ordering, not game rules. It
// collects opaque operations submitted by each seated player, tags them with
// their owner, groups them by frame, and broadcasts them to every online
// player at a fixed cadence. Everything broadcast is kept as round history
// so a reconnecting player can be replayed the whole round so far. It never
// interprets payloads: all game logic stays on the clients.
//
// Module overview:
// - `round.rs`:      Round state machine (`AwaitingConnect -> Active ->
//                    Ended`), pending/history logs, flush, reconnect
//                    catch-up, timeout and all-offline detection. The core
//                    data structure that `server.rs` drives.
// - `oplog.rs`:      Frame-indexed operation logs.
// - `packetizer.rs`: Splits a log into packet bodies within the byte budget.
// - `directory.rs`:  `PlayerDirectory`, the round's view of player
//                    sessions (online state, sockets, settlement).
// - `config.rs`:     `RoundConfig` / `ServerConfig`, JSON-loadable.
// - `error.rs`:      `RoundError`, `ConfigError`.
// - `server.rs`:     TCP listener, connection threads (one per client), and the
//                    main event loop. Uses `std::net` with a thread-per-reader
//                    architecture and an `mpsc` channel to funnel events into
//                    the single-threaded `Round`.
// - `client.rs`:     `NetClient`, a blocking-free TCP client for the table
//                    protocol.
//
// Dependencies: `lockstep_protocol` (message types, record layout, framing).
//
// The relay can run as a standalone binary (`main.rs`) or be embedded in a
// host process via the library API (`start_relay`).

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod oplog;
pub mod packetizer;
pub mod round;
pub mod server;

pub use config::{RoundConfig, ServerConfig};
pub use directory::PlayerDirectory;
pub use error::{ConfigError, RoundError};
pub use round::{Round, RoundState, Seat};
pub use server::{RelayHandle, start_relay};
