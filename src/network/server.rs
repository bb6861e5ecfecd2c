//! TCP Game Server
//!
//! Accepts sockets, frames the byte stream into packets, and shuttles them
//! to the engine task. The engine task is the only owner of game state;
//! connection tasks never touch it. Heartbeats, the login grace window, and
//! stale-connection reaping all run on the engine task's ticker.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use crate::game::engine::{Effect, EngineConfig, GameEngine};
use crate::game::ConnId;
use crate::protocol::{ClientPacket, DisconnectReason, ServerPacket};
use crate::wire::WireError;
use crate::{DEFAULT_PORT, HEARTBEAT_INTERVAL_SECS, LOGIN_GRACE_SECS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Password every Login must present.
    pub password: String,
    /// Seed for the engine RNG.
    pub seed: u64,
    /// Heartbeat cadence; connections silent for two intervals are dropped.
    pub heartbeat_interval: Duration,
    /// How long an unauthenticated connection may linger.
    pub login_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            password: String::new(),
            seed: 0,
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            login_grace: Duration::from_secs(LOGIN_GRACE_SECS),
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind or accept.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What connection tasks report to the engine task.
enum NetEvent {
    Connected { conn: ConnId, tx: mpsc::Sender<ServerPacket>, close: oneshot::Sender<()> },
    Packet { conn: ConnId, packet: ClientPacket },
    Disconnected { conn: ConnId },
}

/// Per-connection bookkeeping on the engine task.
struct ConnState {
    tx: mpsc::Sender<ServerPacket>,
    /// Dropped with the entry; closing it ends the connection's read task,
    /// so a kicked or reaped socket cannot keep feeding the engine.
    _close: oneshot::Sender<()>,
    opened: Instant,
    last_seen: Instant,
    logged_in: bool,
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    listener: TcpListener,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Bind the listener. The server does not accept until [`run`] is
    /// called.
    ///
    /// [`run`]: GameServer::run
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self { config, listener, shutdown_tx })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for requesting shutdown from outside the accept loop.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Accept connections until shutdown. The engine task exits after the
    /// accept loop drops its event sender.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("listening on {}", self.listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::channel(256);
        let engine = GameEngine::new(EngineConfig {
            password: self.config.password.clone(),
            seed: self.config.seed,
        });
        let engine_task = tokio::spawn(run_engine(
            engine,
            event_rx,
            self.config.clone(),
            self.shutdown_tx.clone(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut next_conn = 1u64;
        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, addr)) => {
                        let conn = ConnId(next_conn);
                        next_conn += 1;
                        info!(%conn, %addr, "connection accepted");
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(handle_connection(
                            stream,
                            conn,
                            event_tx.clone(),
                            self.shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => error!("accept error: {e}"),
                },
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        drop(event_tx);
        let _ = engine_task.await;
        Ok(())
    }
}

/// The single task that owns the engine and all per-connection senders.
async fn run_engine(
    mut engine: GameEngine,
    mut events: mpsc::Receiver<NetEvent>,
    config: ServerConfig,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut conns: HashMap<ConnId, ConnState> = HashMap::new();
    let mut ticker = interval(config.heartbeat_interval);
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(NetEvent::Connected { conn, tx, close }) => {
                    let now = Instant::now();
                    conns.insert(conn, ConnState {
                        tx,
                        _close: close,
                        opened: now,
                        last_seen: now,
                        logged_in: false,
                    });
                }
                Some(NetEvent::Packet { conn, packet }) => {
                    // In-flight packets can race the kick or reap that
                    // removed their connection; the engine never sees them.
                    let Some(state) = conns.get_mut(&conn) else {
                        debug!(%conn, "packet from a closed connection, dropped");
                        continue;
                    };
                    state.last_seen = Instant::now();
                    if matches!(packet, ClientPacket::Login { .. }) {
                        state.logged_in = true;
                    }
                    let effects = engine.on_packet(conn, packet);
                    apply_effects(&mut engine, &mut conns, effects).await;
                }
                Some(NetEvent::Disconnected { conn }) => {
                    conns.remove(&conn);
                    engine.on_disconnect(conn);
                    if engine.is_abandoned() {
                        info!("game abandoned, stopping server");
                        let _ = shutdown_tx.send(());
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                reap_and_heartbeat(&mut engine, &mut conns, &config).await;
            }
            _ = shutdown_rx.recv() => {
                for state in conns.values() {
                    let _ = state.tx.send(ServerPacket::Disconnect {
                        reason: DisconnectReason::ServerShutdown,
                    }).await;
                }
                break;
            }
        }
    }
}

/// One ticker pass: drop stale and never-authenticated connections, ping the
/// rest.
async fn reap_and_heartbeat(
    engine: &mut GameEngine,
    conns: &mut HashMap<ConnId, ConnState>,
    config: &ServerConfig,
) {
    let now = Instant::now();
    let stale_after = config.heartbeat_interval * 2;

    let mut timed_out = Vec::new();
    let mut never_logged_in = Vec::new();
    for (&conn, state) in conns.iter() {
        if now.duration_since(state.last_seen) >= stale_after {
            timed_out.push(conn);
        } else if !state.logged_in && now.duration_since(state.opened) >= config.login_grace {
            never_logged_in.push(conn);
        }
    }

    for conn in timed_out {
        warn!(%conn, "heartbeat timeout");
        if let Some(state) = conns.remove(&conn) {
            let _ = state
                .tx
                .send(ServerPacket::Disconnect { reason: DisconnectReason::Timeout })
                .await;
        }
        engine.on_disconnect(conn);
    }
    for conn in never_logged_in {
        debug!(%conn, "login grace expired");
        if let Some(state) = conns.remove(&conn) {
            let _ = state
                .tx
                .send(ServerPacket::Disconnect { reason: DisconnectReason::Timeout })
                .await;
        }
    }

    for state in conns.values() {
        let _ = state.tx.send(ServerPacket::HeartbeatRequest).await;
    }
}

/// Carry out the engine's effects. A kick delivers the Disconnect packet and
/// then drops the connection entry, which stops both halves of the socket
/// task; the reader reports the close back as a normal disconnect.
async fn apply_effects(
    engine: &mut GameEngine,
    conns: &mut HashMap<ConnId, ConnState>,
    effects: Vec<Effect>,
) {
    for effect in effects {
        match effect {
            Effect::Send { conn, packet } => {
                if let Some(state) = conns.get(&conn) {
                    let _ = state.tx.send(packet).await;
                }
            }
            Effect::Kick { conn, reason } => {
                if let Some(state) = conns.remove(&conn) {
                    let _ = state
                        .tx
                        .send(ServerPacket::Disconnect { reason })
                        .await;
                }
                engine.on_disconnect(conn);
            }
        }
    }
}

/// Per-connection task: a writer draining the outbound channel, and a read
/// loop framing the inbound stream.
async fn handle_connection(
    stream: TcpStream,
    conn: ConnId,
    events: mpsc::Sender<NetEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<ServerPacket>(64);
    // Resolves when the engine task drops this connection's entry.
    let (close_tx, mut close_rx) = oneshot::channel::<()>();
    // Kept for the wire-violation path below; the engine owns the other
    // clone.
    let local_tx = tx.clone();
    if events.send(NetEvent::Connected { conn, tx, close: close_tx }).await.is_err() {
        return;
    }

    let writer_task = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            let closing = matches!(packet, ServerPacket::Disconnect { .. });
            if writer.write_all(&packet.encode()).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    'read: loop {
        tokio::select! {
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break 'read,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    loop {
                        match ClientPacket::decode_from(&buf) {
                            Ok((packet, used)) => {
                                buf.drain(..used);
                                if events.send(NetEvent::Packet { conn, packet }).await.is_err() {
                                    break 'read;
                                }
                            }
                            // An incomplete frame; wait for more bytes.
                            Err(WireError::TruncatedInput) => break,
                            Err(err) => {
                                warn!(%conn, %err, "malformed packet, closing");
                                let _ = local_tx.send(ServerPacket::Disconnect {
                                    reason: DisconnectReason::ProtocolViolation,
                                }).await;
                                break 'read;
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!(%conn, "read error: {e}");
                    break 'read;
                }
            },
            _ = &mut close_rx => break 'read,
            _ = shutdown_rx.recv() => break 'read,
        }
    }

    let _ = events.send(NetEvent::Disconnected { conn }).await;
    drop(local_tx);
    let _ = writer_task.await;
    debug!(%conn, "connection task done");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    async fn spawn_server(config: ServerConfig) -> (SocketAddr, broadcast::Sender<()>) {
        let server = GameServer::bind(config).await.expect("bind");
        let addr = server.local_addr().expect("addr");
        let shutdown = server.shutdown_handle();
        tokio::spawn(server.run());
        (addr, shutdown)
    }

    async fn test_server(password: &str) -> (SocketAddr, broadcast::Sender<()>) {
        spawn_server(ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            password: password.to_owned(),
            seed: 7,
            ..ServerConfig::default()
        })
        .await
    }

    async fn recv_packet(stream: &mut TcpStream, buf: &mut Vec<u8>) -> ServerPacket {
        loop {
            match ServerPacket::decode_from(buf) {
                Ok((packet, used)) => {
                    buf.drain(..used);
                    return packet;
                }
                Err(WireError::TruncatedInput) => {}
                Err(err) => panic!("bad packet from server: {err}"),
            }
            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk).await.expect("read");
            assert!(n > 0, "server closed the connection early");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// The next packet that is not a heartbeat.
    async fn recv_game_packet(stream: &mut TcpStream, buf: &mut Vec<u8>) -> ServerPacket {
        loop {
            match recv_packet(stream, buf).await {
                ServerPacket::HeartbeatRequest => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn test_wrong_password_receives_disconnect_packet() {
        let (addr, shutdown) = test_server("pw").await;
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let login =
            ClientPacket::Login { name: "ada".to_owned(), password: "nope".to_owned() };
        stream.write_all(&login.encode()).await.expect("write");

        let mut buf = Vec::new();
        let packet = recv_game_packet(&mut stream, &mut buf).await;
        assert_eq!(
            packet,
            ServerPacket::Disconnect { reason: DisconnectReason::WrongPassword }
        );
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_malformed_bytes_receive_protocol_violation() {
        let (addr, shutdown) = test_server("pw").await;
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        // 0xFF is not a packet kind.
        stream.write_all(&[0xFF, 0, 0, 0]).await.expect("write");

        let mut buf = Vec::new();
        let packet = recv_game_packet(&mut stream, &mut buf).await;
        assert_eq!(
            packet,
            ServerPacket::Disconnect { reason: DisconnectReason::ProtocolViolation }
        );
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_kicked_socket_cannot_reseat_a_player() {
        let (addr, shutdown) = test_server("pw").await;
        let mut dead = TcpStream::connect(addr).await.expect("connect");
        let bad = ClientPacket::Login { name: "ada".to_owned(), password: "nope".to_owned() };
        dead.write_all(&bad.encode()).await.expect("write");

        let mut buf = Vec::new();
        assert_eq!(
            recv_game_packet(&mut dead, &mut buf).await,
            ServerPacket::Disconnect { reason: DisconnectReason::WrongPassword }
        );

        // The kicked socket retries with the right password; the server
        // must never see it.
        let retry = ClientPacket::Login { name: "ada".to_owned(), password: "pw".to_owned() };
        let _ = dead.write_all(&retry.encode()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The name is still free for a fresh connection.
        let mut a = TcpStream::connect(addr).await.expect("connect a");
        let mut b = TcpStream::connect(addr).await.expect("connect b");
        let login_a = ClientPacket::Login { name: "ada".to_owned(), password: "pw".to_owned() };
        let login_b = ClientPacket::Login { name: "bab".to_owned(), password: "pw".to_owned() };
        a.write_all(&login_a.encode()).await.expect("write a");
        b.write_all(&login_b.encode()).await.expect("write b");

        let mut buf_a = Vec::new();
        let packet = recv_game_packet(&mut a, &mut buf_a).await;
        assert!(
            matches!(packet, ServerPacket::WordChoice { .. }),
            "seat poisoned by the kicked socket: {packet:?}"
        );
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_unauthenticated_socket_reaped_with_disconnect() {
        let (addr, shutdown) = spawn_server(ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            password: "pw".to_owned(),
            seed: 7,
            heartbeat_interval: Duration::from_millis(200),
            login_grace: Duration::from_millis(50),
        })
        .await;

        // Connect and never log in.
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let mut buf = Vec::new();
        assert_eq!(
            recv_game_packet(&mut stream, &mut buf).await,
            ServerPacket::Disconnect { reason: DisconnectReason::Timeout }
        );
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_two_logins_reach_word_choice() {
        let (addr, shutdown) = test_server("pw").await;
        let mut a = TcpStream::connect(addr).await.expect("connect a");
        let mut b = TcpStream::connect(addr).await.expect("connect b");

        let login_a = ClientPacket::Login { name: "A".to_owned(), password: "pw".to_owned() };
        let login_b = ClientPacket::Login { name: "B".to_owned(), password: "pw".to_owned() };
        a.write_all(&login_a.encode()).await.expect("write a");
        b.write_all(&login_b.encode()).await.expect("write b");

        let mut buf_a = Vec::new();
        let mut buf_b = Vec::new();
        let deal_a = recv_game_packet(&mut a, &mut buf_a).await;
        let deal_b = recv_game_packet(&mut b, &mut buf_b).await;
        for deal in [deal_a, deal_b] {
            let ServerPacket::WordChoice { word } = deal else {
                panic!("expected a word deal, got {deal:?}");
            };
            assert!(word.iter().all(|c| c.is_sound()));
        }
        let _ = shutdown.send(());
    }
}
