// TCP server and main event loop for one lockstep table.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and spawns a connection thread for each.
// - **Connection threads** (one per client): read the `Hello` handshake under
//   a read timeout and forward it as `InternalEvent::Hello`, then wait for the
//   main thread's verdict. Once admitted they call `framing::read_message()`
//   in a loop, decode `ClientMessage`, and send `InternalEvent::MessageFrom`.
//   On error/EOF/Goodbye, send `InternalEvent::Disconnected`.
// - **Main thread**: owns the `Round` and its `TcpDirectory`, receives events
//   from the channel, and dispatches them. `recv_timeout` waits at most until
//   the next due tick: the fast tick flushes pending operations, the slow
//   tick checks for round timeout and all-offline.
//
// The main thread is the only writer to client TCP streams (through
// `TcpDirectory::send_to`). Connection threads only read from streams.
// Every stream has a write timeout; a send that times out shuts the socket
// down, which the connection thread then reports as a disconnect.
// Disconnects carry the connection's token, so a stale report from a
// replaced socket is ignored.
//
// Table flow:
// - `Hello` seats a new player, or re-attaches the socket of a seated one.
//   When the table is full the next round starts at once.
// - `Ready` is a connect for an online player and a reconnect (catch-up) for
//   one whose socket was re-attached.
// - `Ops` goes to `Round::submit_batch`.
// - Disconnect or `Goodbye` records a leave marker during an active round
//   and marks the player offline; before the round goes active it frees the
//   seat instead.
// - After a round ends, connected clients send `Join` to sit down again.
//
// Shutdown: the main thread checks a `keep_running` flag (set to false by
// `RelayHandle::stop`) and breaks out of the event loop.

use std::collections::BTreeMap;
use std::io::{self, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use lockstep_protocol::{
    ClientMessage, FrameIndex, PlayerId, RoundId, ServerMessage, read_message,
};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::directory::PlayerDirectory;
use crate::round::{Round, RoundState, Seat};

/// How long a new connection may take to send its `Hello`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Events sent from listener/connection threads to the main thread.
enum InternalEvent {
    /// A handshake was read. The main thread answers on `reply` with the
    /// connection token if the player was admitted.
    Hello {
        stream: TcpStream,
        player_id: PlayerId,
        nickname: String,
        gold: u64,
        reply: Sender<Option<u64>>,
    },
    MessageFrom {
        player_id: PlayerId,
        message: ClientMessage,
    },
    Disconnected {
        player_id: PlayerId,
        token: u64,
    },
}

/// One known player: the write half of their socket plus what the round
/// asks the directory about.
struct Connection {
    writer: Option<TcpStream>,
    token: u64,
    online: bool,
    last_frame: FrameIndex,
    nickname: String,
    gold: u64,
}

/// `PlayerDirectory` over live TCP connections.
pub struct TcpDirectory {
    players: BTreeMap<PlayerId, Connection>,
    write_timeout: Duration,
    next_token: u64,
}

impl TcpDirectory {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            players: BTreeMap::new(),
            write_timeout,
            next_token: 0,
        }
    }

    /// Attach `stream` as the player's socket. Returns the token that the
    /// connection's disconnect report must carry.
    fn attach(
        &mut self,
        player: PlayerId,
        stream: TcpStream,
        online: bool,
        nickname: String,
        gold: u64,
    ) -> u64 {
        if let Err(e) = stream.set_write_timeout(Some(self.write_timeout)) {
            warn!(player = %player, error = %e, "could not set write timeout");
        }
        self.next_token += 1;
        let conn = self.players.entry(player).or_insert_with(|| Connection {
            writer: None,
            token: 0,
            online: false,
            last_frame: FrameIndex::default(),
            nickname: String::new(),
            gold: 0,
        });
        conn.writer = Some(stream);
        conn.token = self.next_token;
        conn.online = online;
        conn.nickname = nickname;
        conn.gold = gold;
        self.next_token
    }

    /// True if `token` belongs to the player's current connection.
    fn is_current(&self, player: PlayerId, token: u64) -> bool {
        self.players
            .get(&player)
            .is_some_and(|conn| conn.token == token)
    }

    fn detach(&mut self, player: PlayerId) {
        if let Some(conn) = self.players.get_mut(&player) {
            conn.writer = None;
            conn.online = false;
        }
    }

    fn remove(&mut self, player: PlayerId) {
        self.players.remove(&player);
    }

    fn is_attached(&self, player: PlayerId) -> bool {
        self.players
            .get(&player)
            .is_some_and(|conn| conn.writer.is_some())
    }

    fn seat_of(&self, player: PlayerId) -> Option<Seat> {
        self.players.get(&player).map(|conn| Seat {
            nickname: conn.nickname.clone(),
            gold: conn.gold,
        })
    }

    fn note_frame(&mut self, player: PlayerId, frame: FrameIndex) {
        if let Some(conn) = self.players.get_mut(&player) {
            conn.last_frame = conn.last_frame.max(frame);
        }
    }

    /// Forget every player whose socket is gone.
    fn prune_detached(&mut self) {
        self.players.retain(|_, conn| conn.writer.is_some());
    }
}

impl PlayerDirectory for TcpDirectory {
    fn is_online(&self, player: PlayerId) -> bool {
        self.players.get(&player).is_some_and(|conn| conn.online)
    }

    fn last_frame(&self, player: PlayerId) -> FrameIndex {
        self.players
            .get(&player)
            .map(|conn| conn.last_frame)
            .unwrap_or_default()
    }

    fn set_online(&mut self, player: PlayerId) {
        if let Some(conn) = self.players.get_mut(&player) {
            conn.online = conn.writer.is_some();
        }
    }

    fn reset_round_data(&mut self, player: PlayerId) {
        if let Some(conn) = self.players.get_mut(&player) {
            conn.last_frame = FrameIndex::default();
        }
    }

    fn send_to(&mut self, player: PlayerId, bytes: &[u8]) -> io::Result<()> {
        let not_connected = || io::Error::new(io::ErrorKind::NotConnected, "no connection");
        let conn = self.players.get_mut(&player).ok_or_else(not_connected)?;
        let stream = conn.writer.as_mut().ok_or_else(not_connected)?;
        if let Err(e) = stream.write_all(bytes) {
            // A stalled or broken peer is cut off. Its connection thread sees
            // the shutdown and reports the disconnect.
            info!(player = %player, error = %e, "dropping connection");
            let _ = stream.shutdown(Shutdown::Both);
            conn.writer = None;
            conn.online = false;
            return Err(e);
        }
        Ok(())
    }

    fn settle(&mut self, player: PlayerId) {
        if let Some(conn) = self.players.get(&player) {
            info!(player = %player, nickname = %conn.nickname, gold = conn.gold, "settled");
        }
    }
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }
}

/// Start the table server on a background thread. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used
/// to let the OS pick a free port).
pub fn start_relay(config: ServerConfig) -> io::Result<(RelayHandle, SocketAddr)> {
    config
        .validate()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let listener = TcpListener::bind((config.host.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    info!(%addr, players = config.round.required_players, "relay listening");

    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();
    let thread = thread::spawn(move || {
        run_relay(listener, config, keep_running_clone);
    });

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main-thread state: the round plus the id of the last round started.
struct Table {
    round: Round<TcpDirectory>,
    last_round: RoundId,
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(listener: TcpListener, config: ServerConfig, keep_running: Arc<AtomicBool>) {
    let mut table = Table {
        round: Round::new(
            config.round.clone(),
            TcpDirectory::new(config.write_timeout()),
        ),
        last_round: RoundId::default(),
    };

    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    // Non-blocking so the accept thread can check keep_running periodically.
    if let Err(e) = listener.set_nonblocking(true) {
        warn!(error = %e, "listener stays blocking");
    }

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    stream.set_nonblocking(false).ok();
                    let tx_conn = tx_listener.clone();
                    let keep_running_conn = keep_running_listener.clone();
                    thread::spawn(move || {
                        connection_thread(stream, tx_conn, keep_running_conn);
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed, listener stopping");
                    break;
                }
            }
        }
    });

    let frame_interval = config.frame_interval();
    let slow_tick = config.slow_tick();
    let write_timeout = config.write_timeout();
    let mut next_flush = Instant::now() + frame_interval;
    let mut next_check = Instant::now() + slow_tick;

    while keep_running.load(Ordering::SeqCst) {
        let wait = next_flush.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(event) => {
                handle_event(&mut table, event, write_timeout);
                // Drain any additional events that arrived during handling.
                while let Ok(event) = rx.try_recv() {
                    handle_event(&mut table, event, write_timeout);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        if now >= next_flush {
            table.round.flush_frame();
            next_flush = now + frame_interval;
        }
        if now >= next_check {
            if table.round.on_slow_tick(now) {
                table.round.directory_mut().prune_detached();
            }
            next_check = now + slow_tick;
        }
    }
    info!("relay stopped");
}

/// Dispatch a single event to the table.
fn handle_event(table: &mut Table, event: InternalEvent, write_timeout: Duration) {
    match event {
        InternalEvent::Hello {
            stream,
            player_id,
            nickname,
            gold,
            reply,
        } => {
            let token = handle_hello(table, stream, player_id, nickname, gold, write_timeout);
            // The connection thread may already be gone.
            let _ = reply.send(token);
        }
        InternalEvent::MessageFrom { player_id, message } => {
            handle_message(table, player_id, message);
        }
        InternalEvent::Disconnected { player_id, token } => {
            if table.round.directory().is_current(player_id, token) {
                handle_disconnect(table, player_id);
            } else {
                debug!(player = %player_id, "stale disconnect ignored");
            }
        }
    }
}

/// Connection thread: read the Hello handshake, hand it to the main thread,
/// and run the reader loop if the player was admitted.
fn connection_thread(stream: TcpStream, tx: Sender<InternalEvent>, keep_running: Arc<AtomicBool>) {
    // A read timeout so the handshake doesn't block forever.
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok();

    let mut reader = match stream.try_clone() {
        Ok(s) => BufReader::new(s),
        Err(e) => {
            warn!(error = %e, "could not clone stream");
            return;
        }
    };

    let hello = match read_message(&mut reader).map(|bytes| ClientMessage::decode(&bytes)) {
        Ok(Ok(msg)) => msg,
        Ok(Err(e)) => {
            warn!(error = %e, "bad handshake");
            return;
        }
        Err(e) => {
            warn!(error = %e, "handshake read failed");
            return;
        }
    };

    let ClientMessage::Hello {
        player_id,
        nickname,
        gold,
    } = hello
    else {
        warn!("expected Hello as first message, dropping connection");
        return;
    };

    let (reply, verdict) = mpsc::channel();
    let event = InternalEvent::Hello {
        stream,
        player_id,
        nickname,
        gold,
        reply,
    };
    if tx.send(event).is_err() {
        return;
    }
    let Ok(Some(token)) = verdict.recv() else {
        return;
    };

    // Clear the read timeout for the long-lived reader loop.
    reader.get_ref().set_read_timeout(None).ok();
    reader_loop(reader, player_id, token, tx, keep_running);
}

/// Seat or re-attach the player behind a Hello. Returns the connection
/// token, or `None` if the player was rejected.
fn handle_hello(
    table: &mut Table,
    stream: TcpStream,
    player_id: PlayerId,
    nickname: String,
    gold: u64,
    write_timeout: Duration,
) -> Option<u64> {
    if let Err(reason) = admit(table, player_id, &nickname) {
        info!(player = %player_id, %reason, "rejected");
        let mut stream = stream;
        stream.set_write_timeout(Some(write_timeout)).ok();
        let rejected = ServerMessage::Rejected { reason };
        let _ = stream.write_all(&rejected.to_frame());
        return None;
    }

    // A seated player coming back stays offline until their Ready has been
    // answered with the catch-up stream.
    let returning = table.round.is_seated(player_id);
    let token = table
        .round
        .directory_mut()
        .attach(player_id, stream, !returning, nickname.clone(), gold);

    let welcome = ServerMessage::Welcome {
        player_id,
        required_players: u32::try_from(table.round.config().required_players)
            .unwrap_or(u32::MAX),
    };
    send(table, player_id, &welcome);

    if returning {
        info!(player = %player_id, "player returned");
    } else {
        match table.round.add_player(player_id, Seat { nickname, gold }) {
            Ok(()) => {
                info!(player = %player_id, seated = table.round.player_count(), "player seated");
                maybe_start_round(table);
            }
            Err(e) => warn!(player = %player_id, error = %e, "could not seat player"),
        }
    }
    Some(token)
}

/// Decide whether a Hello may proceed.
fn admit(table: &Table, player_id: PlayerId, nickname: &str) -> Result<(), String> {
    if player_id == PlayerId::SYSTEM {
        return Err("player id 0 is reserved".into());
    }
    if nickname.is_empty() {
        return Err("nickname must not be empty".into());
    }
    let max_nickname = table.round.config().max_nickname_len;
    if nickname.len() > max_nickname {
        return Err(format!(
            "nickname of {} bytes exceeds the {max_nickname}-byte limit",
            nickname.len()
        ));
    }
    let directory = table.round.directory();
    if directory.is_attached(player_id) {
        return Err(format!("player {player_id} is already connected"));
    }
    if table.round.is_seated(player_id) {
        return Ok(());
    }
    if table.round.state() == RoundState::Active {
        return Err("a round is in progress".into());
    }
    if table.round.player_count() >= table.round.config().required_players {
        return Err("table is full".into());
    }
    Ok(())
}

/// Reader loop for a single client. Runs on its connection thread.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    player_id: PlayerId,
    token: u64,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match read_message(&mut reader) {
            Ok(bytes) => match ClientMessage::decode(&bytes) {
                Ok(ClientMessage::Goodbye) => break,
                Ok(message) => {
                    let _ = tx.send(InternalEvent::MessageFrom { player_id, message });
                }
                Err(e) => {
                    warn!(player = %player_id, error = %e, "malformed message, disconnecting");
                    break;
                }
            },
            Err(e) => {
                debug!(player = %player_id, error = %e, "connection closed");
                break;
            }
        }
    }
    let _ = tx.send(InternalEvent::Disconnected { player_id, token });
}

/// Handle a client message after the handshake.
fn handle_message(table: &mut Table, player_id: PlayerId, message: ClientMessage) {
    match message {
        ClientMessage::Ready => {
            if !table.round.is_seated(player_id) {
                debug!(player = %player_id, "ready from unseated player ignored");
                return;
            }
            if table.round.directory().is_online(player_id) {
                if table.round.player_count() != table.round.config().required_players {
                    debug!(player = %player_id, "ready before table is full ignored");
                    return;
                }
                if let Err(e) = table.round.on_player_connect(player_id, Instant::now()) {
                    warn!(player = %player_id, error = %e, "connect failed");
                }
            } else if let Err(e) = table.round.on_player_reconnect(player_id) {
                warn!(player = %player_id, error = %e, "reconnect failed");
            }
        }
        ClientMessage::Ops {
            frame_index,
            op_count,
            data,
        } => {
            table.round.directory_mut().note_frame(player_id, frame_index);
            // Rejections are logged by the round.
            let _ = table
                .round
                .submit_batch(player_id, frame_index, op_count, &data);
        }
        ClientMessage::Join => {
            if table.round.is_seated(player_id) {
                return;
            }
            let Some(seat) = table.round.directory().seat_of(player_id) else {
                return;
            };
            match table.round.add_player(player_id, seat) {
                Ok(()) => {
                    info!(player = %player_id, "player rejoined");
                    maybe_start_round(table);
                }
                Err(e) => {
                    let reason = e.to_string();
                    send(table, player_id, &ServerMessage::Rejected { reason });
                }
            }
        }
        ClientMessage::Hello { .. } | ClientMessage::Goodbye => {
            // Hello is handled by `handle_hello`, Goodbye in the reader loop.
        }
    }
}

fn handle_disconnect(table: &mut Table, player_id: PlayerId) {
    info!(player = %player_id, "player disconnected");
    if table.round.state() == RoundState::Active && table.round.is_seated(player_id) {
        if let Err(e) = table.round.record_player_leave(player_id) {
            warn!(player = %player_id, error = %e, "could not record leave");
        }
        table.round.directory_mut().detach(player_id);
        return;
    }
    if table.round.is_seated(player_id) {
        let _ = table.round.remove_player(player_id);
    }
    table.round.directory_mut().remove(player_id);
}

/// Start the next round once every seat is taken.
fn maybe_start_round(table: &mut Table) {
    if table.round.player_count() != table.round.config().required_players {
        return;
    }
    let next = RoundId(table.last_round.0 + 1);
    match table.round.start_round(next) {
        Ok(()) => table.last_round = next,
        Err(e) => warn!(round = %next, error = %e, "could not start round"),
    }
}

fn send(table: &mut Table, player_id: PlayerId, message: &ServerMessage) {
    if let Err(e) = table
        .round
        .directory_mut()
        .send_to(player_id, &message.to_frame())
    {
        warn!(player = %player_id, error = %e, "send failed");
    }
}
