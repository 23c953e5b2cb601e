// Round state for one table.
//
// `Round` is the central data structure that `server.rs` drives. It owns the
// seat list, the pending and history operation logs, and the round state
// machine. All mutation happens through methods called from the server's
// single-threaded main loop: no internal locking.
//
// Lifecycle: `AwaitingConnect -> Active -> Ended`, and back to
// `AwaitingConnect` when the same `Round` is reused for the next round via
// `start_round` (or `reset`).
// - `start_round` needs exactly `required_players` seated. It notifies every
//   online player but does not go active.
// - `on_player_connect` counts distinct players; when all seated players have
//   connected the round goes active and a system `ROUND_START` record
//   (seating, nicknames, starting gold) is queued at frame 0.
// - `flush_frame` (fast tick) broadcasts the whole pending log to every
//   online player, then appends it to history.
// - `on_slow_tick` ends the round on timeout or when everyone is offline.
// - `on_player_reconnect` replays the entire history to one player using the
//   same packetizer as the live broadcast, so the catch-up stream has the
//   same frame groups the others saw live.
// - `end_round` notifies, settles every seat, and drops all round-scoped
//   logs and seats.
//
// Player sockets and online state live behind `PlayerDirectory`. Send
// failures are logged and skipped; they never stop a broadcast or round end.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use lockstep_protocol::codec::decode_submitted_ops;
use lockstep_protocol::{
    FrameIndex, OpType, OperationRecord, OpsPacket, PlayerId, RoundId, RoundStartOp,
    SeatAssignment, ServerMessage, SubmittedOp,
};
use tracing::{debug, info, warn};

use crate::config::RoundConfig;
use crate::directory::PlayerDirectory;
use crate::error::RoundError;
use crate::oplog::OperationLog;
use crate::packetizer::Packetizer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    AwaitingConnect,
    Active,
    Ended,
}

/// Per-seat data captured when a player sits down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Seat {
    pub nickname: String,
    pub gold: u64,
}

/// Who receives an operations stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    AllOnline,
    Player(PlayerId),
}

pub struct Round<D: PlayerDirectory> {
    config: RoundConfig,
    packetizer: Packetizer,
    directory: D,

    round_id: RoundId,
    state: RoundState,
    started_at: Option<Instant>,
    connected: BTreeSet<PlayerId>,
    players: BTreeMap<PlayerId, Seat>,

    // Operation logs
    pending: OperationLog,
    history: OperationLog,
    history_bytes: usize,
    history_entries: usize,
}

impl<D: PlayerDirectory> Round<D> {
    /// `config` must already have passed `RoundConfig::validate`.
    pub fn new(config: RoundConfig, directory: D) -> Self {
        Self {
            packetizer: Packetizer::from_config(&config),
            config,
            directory,
            round_id: RoundId::default(),
            state: RoundState::AwaitingConnect,
            started_at: None,
            connected: BTreeSet::new(),
            players: BTreeMap::new(),
            pending: OperationLog::new(),
            history: OperationLog::new(),
            history_bytes: 0,
            history_entries: 0,
        }
    }

    /// Seat a player for the next round.
    pub fn add_player(&mut self, player: PlayerId, seat: Seat) -> Result<(), RoundError> {
        if player == PlayerId::SYSTEM {
            return Err(RoundError::ReservedPlayerId);
        }
        if self.state == RoundState::Active {
            return Err(RoundError::PlayersLocked);
        }
        if self.players.contains_key(&player) {
            return Err(RoundError::DuplicatePlayer(player));
        }
        if seat.nickname.len() > self.config.max_nickname_len {
            return Err(RoundError::NicknameTooLong {
                len: seat.nickname.len(),
                max: self.config.max_nickname_len,
            });
        }
        if self.players.len() >= self.config.required_players {
            return Err(RoundError::TableFull(self.config.required_players));
        }
        self.players.insert(player, seat);
        Ok(())
    }

    /// Unseat a player between rounds.
    pub fn remove_player(&mut self, player: PlayerId) -> Result<Seat, RoundError> {
        if self.state == RoundState::Active {
            return Err(RoundError::PlayersLocked);
        }
        self.connected.remove(&player);
        self.players
            .remove(&player)
            .ok_or(RoundError::UnknownPlayer(player))
    }

    /// Clear every round-scoped log and counter and wait for connections
    /// under a new id. Seats are kept.
    pub fn reset(&mut self, round_id: RoundId) {
        self.round_id = round_id;
        self.state = RoundState::AwaitingConnect;
        self.started_at = None;
        self.connected.clear();
        self.pending.clear();
        self.history.clear();
        self.history_bytes = 0;
        self.history_entries = 0;
    }

    /// Start round `round_id` with the seated players. Fails without
    /// touching any state unless exactly `required_players` are seated.
    pub fn start_round(&mut self, round_id: RoundId) -> Result<(), RoundError> {
        if self.players.len() != self.config.required_players {
            return Err(RoundError::WrongPlayerCount {
                required: self.config.required_players,
                seated: self.players.len(),
            });
        }
        info!(round = %round_id, players = self.players.len(), "round starting");

        self.reset(round_id);
        let ids: Vec<PlayerId> = self.players.keys().copied().collect();
        for &id in &ids {
            self.directory.reset_round_data(id);
        }
        for id in ids {
            if self.directory.is_online(id) {
                let notice = ServerMessage::RoundStart { player_id: id };
                send(&mut self.directory, id, &notice.to_frame());
            }
        }
        Ok(())
    }

    /// A seated player finished loading. The round goes active when every
    /// seated player has connected; repeated connects are counted once.
    pub fn on_player_connect(&mut self, player: PlayerId, now: Instant) -> Result<(), RoundError> {
        if !self.players.contains_key(&player) {
            return Err(RoundError::UnknownPlayer(player));
        }
        if self.state != RoundState::AwaitingConnect {
            debug!(round = %self.round_id, player = %player, state = ?self.state, "connect ignored");
            return Ok(());
        }
        self.connected.insert(player);
        if self.connected.len() == self.players.len() {
            self.state = RoundState::Active;
            self.started_at = Some(now);
            info!(round = %self.round_id, "all players connected, round active");
            self.record_round_start();
        }
        Ok(())
    }

    /// Slow tick: end the round on timeout or once every player is offline.
    /// Returns true if this tick ended the round.
    pub fn on_slow_tick(&mut self, now: Instant) -> bool {
        if self.state != RoundState::Active {
            return false;
        }
        info!(
            round = %self.round_id,
            history_bytes = self.history_bytes,
            history_entries = self.history_entries,
            "round status"
        );

        let timed_out = self
            .started_at
            .is_some_and(|t| now.saturating_duration_since(t) > self.config.max_round_duration());
        let all_offline = self.all_offline();
        if timed_out || all_offline {
            debug!(round = %self.round_id, timed_out, all_offline, "ending round");
            self.end_round();
            return true;
        }
        false
    }

    /// End the round: notify online players, settle every seat, and drop
    /// all round-scoped state. No-op if already ended.
    pub fn end_round(&mut self) {
        if self.state == RoundState::Ended {
            return;
        }
        info!(round = %self.round_id, "round ended");
        self.state = RoundState::Ended;

        let ids: Vec<PlayerId> = self.players.keys().copied().collect();
        for &id in &ids {
            if self.directory.is_online(id) {
                let notice = ServerMessage::RoundEnd { player_id: id };
                send(&mut self.directory, id, &notice.to_frame());
            }
        }
        for &id in &ids {
            self.directory.settle(id);
        }

        self.pending.clear();
        self.history.clear();
        self.history_bytes = 0;
        self.history_entries = 0;
        self.players.clear();
        self.connected.clear();
    }

    pub fn is_ended(&self) -> bool {
        self.state == RoundState::Ended
    }

    /// Queue operations submitted by `player` at `frame`. Either every record
    /// is queued or none is.
    pub fn record_operations(
        &mut self,
        player: PlayerId,
        frame: FrameIndex,
        ops: Vec<SubmittedOp>,
    ) -> Result<usize, RoundError> {
        self.check_recordable(player)?;
        let max = self.config.max_payload_len();
        if let Some(op) = ops.iter().find(|op| op.payload.len() > max) {
            return Err(RoundError::OversizedPayload {
                len: op.payload.len(),
                max,
            });
        }
        let count = ops.len();
        for op in ops {
            self.pending
                .push(frame, OperationRecord::new(player, op.op_type, op.payload));
        }
        Ok(count)
    }

    /// Decode and queue a raw submission batch. A batch whose declared count
    /// disagrees with its data, or that holds an oversized payload, is
    /// dropped whole.
    pub fn submit_batch(
        &mut self,
        player: PlayerId,
        frame: FrameIndex,
        op_count: u32,
        data: &[u8],
    ) -> Result<usize, RoundError> {
        let result = decode_submitted_ops(op_count, data)
            .map_err(RoundError::from)
            .and_then(|ops| self.record_operations(player, frame, ops));
        if let Err(e) = &result {
            warn!(round = %self.round_id, player = %player, frame = frame.0, error = %e, "dropped operation batch");
        }
        result
    }

    /// Queue a leave marker at the player's last frame. The player stays
    /// seated; the slow tick decides whether the round ends.
    pub fn record_player_leave(&mut self, player: PlayerId) -> Result<(), RoundError> {
        self.check_recordable(player)?;
        let frame = self.directory.last_frame(player);
        self.pending.push(
            frame,
            OperationRecord::new(player, OpType::PLAYER_LEAVE, Vec::new()),
        );
        Ok(())
    }

    /// Fast tick: broadcast everything pending to all online players and move
    /// it into history. Returns the number of records broadcast.
    pub fn flush_frame(&mut self) -> usize {
        if self.state != RoundState::Active || self.pending.is_empty() {
            return 0;
        }
        let pending = self.pending.take();
        let recipients = self.recipients(Destination::AllOnline);
        let sent = dispatch(&self.packetizer, &mut self.directory, &recipients, &pending);
        debug!(round = %self.round_id, records = sent, recipients = recipients.len(), "broadcast operations");

        let moved = self.history.append(pending);
        self.history_bytes += moved.bytes;
        self.history_entries += moved.records;
        sent
    }

    /// Bring a returning player up to date: round-start notice, reconnect
    /// marker, full history replay, then mark them online. Returns the
    /// number of history records replayed.
    pub fn on_player_reconnect(&mut self, player: PlayerId) -> Result<usize, RoundError> {
        if !self.players.contains_key(&player) {
            return Err(RoundError::UnknownPlayer(player));
        }
        let notice = ServerMessage::RoundStart { player_id: player };
        send(&mut self.directory, player, &notice.to_frame());

        let mut replayed = 0;
        if self.state == RoundState::Active {
            let frame = self.directory.last_frame(player);
            self.pending.push(
                frame,
                OperationRecord::new(player, OpType::PLAYER_RECONNECT, Vec::new()),
            );
            let recipients = self.recipients(Destination::Player(player));
            replayed = dispatch(&self.packetizer, &mut self.directory, &recipients, &self.history);
            info!(round = %self.round_id, player = %player, records = replayed, "sent history");
        }
        self.directory.set_online(player);
        Ok(replayed)
    }

    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_seated(&self, player: PlayerId) -> bool {
        self.players.contains_key(&player)
    }

    pub fn has_connected(&self, player: PlayerId) -> bool {
        self.connected.contains(&player)
    }

    pub fn pending(&self) -> &OperationLog {
        &self.pending
    }

    pub fn history(&self) -> &OperationLog {
        &self.history
    }

    /// Exact encoded size of every record moved into history this round.
    pub fn history_bytes(&self) -> usize {
        self.history_bytes
    }

    pub fn history_entries(&self) -> usize {
        self.history_entries
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut D {
        &mut self.directory
    }

    fn check_recordable(&self, player: PlayerId) -> Result<(), RoundError> {
        if self.state != RoundState::Active {
            return Err(RoundError::NotActive);
        }
        if !self.players.contains_key(&player) {
            return Err(RoundError::UnknownPlayer(player));
        }
        Ok(())
    }

    fn all_offline(&self) -> bool {
        self.players.keys().all(|&id| !self.directory.is_online(id))
    }

    fn recipients(&self, destination: Destination) -> Vec<PlayerId> {
        match destination {
            Destination::AllOnline => self
                .players
                .keys()
                .copied()
                .filter(|&id| self.directory.is_online(id))
                .collect(),
            Destination::Player(id) => vec![id],
        }
    }

    fn record_round_start(&mut self) {
        let seats = self
            .players
            .iter()
            .zip(0u16..)
            .map(|((&player_id, seat), index)| SeatAssignment {
                player_id,
                seat: index,
                nickname: seat.nickname.clone(),
                gold: seat.gold,
            })
            .collect();
        let payload = RoundStartOp { seats }.encode();
        let max = self.config.max_payload_len();
        if payload.len() > max {
            warn!(round = %self.round_id, len = payload.len(), max, "round start record too large, not recorded");
            return;
        }
        self.pending.push(
            FrameIndex(0),
            OperationRecord::new(PlayerId::SYSTEM, OpType::ROUND_START, payload),
        );
    }
}

/// Packetize `log` once and send every packet to each recipient, addressed
/// individually. Returns the number of records serialized.
fn dispatch<D: PlayerDirectory>(
    packetizer: &Packetizer,
    directory: &mut D,
    recipients: &[PlayerId],
    log: &OperationLog,
) -> usize {
    packetizer.packetize(log, |body| {
        let mut packet = OpsPacket {
            player_id: PlayerId::SYSTEM,
            continuation: body.continuation,
            frame_count: body.frame_count,
            frame_data: body.frame_data,
        };
        for &id in recipients {
            packet.player_id = id;
            send(directory, id, &packet.to_frame());
        }
    })
}

fn send<D: PlayerDirectory>(directory: &mut D, player: PlayerId, bytes: &[u8]) {
    if let Err(e) = directory.send_to(player, bytes) {
        warn!(player = %player, error = %e, "send failed");
    }
}
