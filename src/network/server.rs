//! WebSocket Game Server
//!
//! Async WebSocket front end for the round engines. Every connection gets
//! a reader loop and a dedicated sender task; engine events are relayed to
//! all connections, commands are routed to the engine for the requested
//! mode, and the settled-round history is served straight from the store.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::boundary::persistence::RoundStore;
use crate::game::engine::{EngineError, EngineHandle};
use crate::game::ledger::JoinOutcome;
use crate::game::round::{GameMode, PlayerId};
use crate::network::protocol::{
    CancelResult, CashOutResult, ClientMessage, ErrorCode, JoinResult, ServerError, ServerMessage,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle timeout before a silent connection is dropped.
    pub idle_timeout: Duration,
    /// Largest history page a client may request.
    pub max_history_page: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static addr"),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            max_history_page: 100,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            ..defaults
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Player behind this connection (after Identify).
    player_id: Option<PlayerId>,
    /// Last activity.
    last_activity: Instant,
    /// Message sender (for direct messaging to client).
    sender: mpsc::Sender<ServerMessage>,
    /// Tears the connection task down on eviction.
    close: mpsc::Sender<()>,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Crash-mode engine.
    crash: EngineHandle,
    /// Slide-mode engine.
    slide: EngineHandle,
    /// Settled-round history.
    store: Arc<dyn RoundStore>,
    /// Connected clients.
    clients: Clients,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server over the two engines.
    pub fn new(
        config: ServerConfig,
        crash: EngineHandle,
        slide: EngineHandle,
        store: Arc<dyn RoundStore>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            crash,
            slide,
            store,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);

        // Relay each engine's event stream to every connection.
        let crash_relay = tokio::spawn(Self::relay_events(
            self.crash.subscribe(),
            self.clients.clone(),
        ));
        let slide_relay = tokio::spawn(Self::relay_events(
            self.slide.subscribe(),
            self.clients.clone(),
        ));

        let cleanup = tokio::spawn(Self::run_cleanup_loop(
            self.clients.clone(),
            self.config.idle_timeout,
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let client_count = self.clients.read().await.len();
                            if client_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        crash_relay.abort();
        slide_relay.abort();
        cleanup.abort();

        Ok(())
    }

    /// Forward one engine's broadcast stream to every connected client.
    async fn relay_events(
        mut events: broadcast::Receiver<crate::game::events::RoundEvent>,
        clients: Clients,
    ) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let msg = ServerMessage::Event(event);
                    let clients = clients.read().await;
                    for client in clients.values() {
                        // Slow consumers drop events rather than stall the relay.
                        let _ = client.sender.try_send(msg.clone());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("event relay lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let crash = self.crash.clone();
        let slide = self.slide.clone();
        let store = self.store.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);
            let (close_tx, mut close_rx) = mpsc::channel::<()>(1);

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    player_id: None,
                    last_activity: Instant::now(),
                    sender: msg_tx.clone(),
                    close: close_tx,
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError {
                                            code: ErrorCode::InvalidInput,
                                            message: "Invalid message format".to_string(),
                                        })).await;
                                        continue;
                                    }
                                };

                                // Update activity
                                {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.last_activity = Instant::now();
                                    }
                                }

                                Self::handle_client_message(
                                    addr, client_msg, &clients, &crash, &slide, &store,
                                    &config, &msg_tx,
                                ).await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx.send(ServerMessage::Pong {
                                    timestamp: 0,
                                    server_time: unix_millis(),
                                }).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = close_rx.recv() => {
                        debug!("Client {} evicted", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            sender_task.abort();
            clients.write().await.remove(&addr);
            debug!("Client {} cleaned up", addr);
        });
    }

    /// Handle a client message.
    #[allow(clippy::too_many_arguments)]
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Clients,
        crash: &EngineHandle,
        slide: &EngineHandle,
        store: &Arc<dyn RoundStore>,
        config: &ServerConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::Identify { player_id } => {
                {
                    let mut clients = clients.write().await;
                    if let Some(client) = clients.get_mut(&addr) {
                        client.player_id = Some(PlayerId::new(player_id.clone()));
                    }
                }
                let _ = sender.send(ServerMessage::Identified {
                    player_id,
                    server_version: config.version.clone(),
                }).await;
            }

            ClientMessage::Join { mode, stake, currency, target } => {
                let player = match Self::identified_player(addr, clients, sender).await {
                    Some(p) => p,
                    None => return,
                };
                let engine = Self::engine_for(mode, crash, slide);
                let result = engine.join(player, stake, currency, target).await;
                let reply = match result {
                    Ok(outcome) => JoinResult {
                        mode,
                        success: true,
                        queued: outcome == JoinOutcome::Queued,
                        reason: None,
                    },
                    Err(e) => JoinResult {
                        mode,
                        success: false,
                        queued: false,
                        reason: Some(Self::reason_code(e)),
                    },
                };
                let _ = sender.send(ServerMessage::JoinResult(reply)).await;
            }

            ClientMessage::Cancel { mode } => {
                let player = match Self::identified_player(addr, clients, sender).await {
                    Some(p) => p,
                    None => return,
                };
                let engine = Self::engine_for(mode, crash, slide);
                let reply = match engine.cancel(player).await {
                    Ok(refunded) => CancelResult {
                        mode,
                        success: true,
                        refunded: Some(refunded),
                        reason: None,
                    },
                    Err(e) => CancelResult {
                        mode,
                        success: false,
                        refunded: None,
                        reason: Some(Self::reason_code(e)),
                    },
                };
                let _ = sender.send(ServerMessage::CancelResult(reply)).await;
            }

            ClientMessage::CashOut { mode } => {
                let player = match Self::identified_player(addr, clients, sender).await {
                    Some(p) => p,
                    None => return,
                };
                let engine = Self::engine_for(mode, crash, slide);
                let reply = match engine.cash_out(player).await {
                    Ok((multiplier, payout)) => CashOutResult {
                        mode,
                        success: true,
                        multiplier: Some(multiplier),
                        payout: Some(payout),
                        reason: None,
                    },
                    Err(e) => CashOutResult {
                        mode,
                        success: false,
                        multiplier: None,
                        payout: None,
                        reason: Some(Self::reason_code(e)),
                    },
                };
                let _ = sender.send(ServerMessage::CashOutResult(reply)).await;
            }

            ClientMessage::Sync => {
                let (crash_snap, slide_snap) =
                    match (crash.snapshot().await, slide.snapshot().await) {
                        (Ok(c), Ok(s)) => (c, s),
                        _ => {
                            let _ = sender.send(ServerMessage::Error(ServerError {
                                code: ErrorCode::EngineUnavailable,
                                message: "Engine unavailable".to_string(),
                            })).await;
                            return;
                        }
                    };
                let _ = sender.send(ServerMessage::State {
                    crash: crash_snap,
                    slide: slide_snap,
                }).await;
            }

            ClientMessage::GetRound { round_id } => {
                // Rounds in flight stay hidden; the proof is only complete
                // once the status is terminal.
                let round = match store.find_round(round_id).await {
                    Ok(found) => found.filter(|r| r.status.is_terminal()),
                    Err(e) => {
                        warn!("history lookup failed: {}", e);
                        let _ = sender.send(ServerMessage::Error(ServerError {
                            code: ErrorCode::HistoryUnavailable,
                            message: "History unavailable".to_string(),
                        })).await;
                        return;
                    }
                };
                let _ = sender.send(ServerMessage::Round { round }).await;
            }

            ClientMessage::ListRounds { skip, limit } => {
                let limit = limit.min(config.max_history_page);
                let rounds = match store.list_settled(skip, limit).await {
                    Ok(rounds) => rounds,
                    Err(e) => {
                        warn!("history listing failed: {}", e);
                        let _ = sender.send(ServerMessage::Error(ServerError {
                            code: ErrorCode::HistoryUnavailable,
                            message: "History unavailable".to_string(),
                        })).await;
                        return;
                    }
                };
                let _ = sender.send(ServerMessage::Rounds { rounds }).await;
            }

            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::Pong {
                    timestamp,
                    server_time: unix_millis(),
                }).await;
            }
        }
    }

    fn engine_for<'a>(
        mode: GameMode,
        crash: &'a EngineHandle,
        slide: &'a EngineHandle,
    ) -> &'a EngineHandle {
        match mode {
            GameMode::Crash => crash,
            GameMode::Slide => slide,
        }
    }

    fn reason_code(e: EngineError) -> String {
        match e {
            EngineError::Ledger(e) => e.code().to_string(),
            EngineError::Stopped => "engine_unavailable".to_string(),
        }
    }

    /// Resolve the identified player for a connection, or send the error.
    async fn identified_player(
        addr: SocketAddr,
        clients: &Clients,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Option<PlayerId> {
        let player = {
            let clients = clients.read().await;
            clients.get(&addr).and_then(|c| c.player_id.clone())
        };
        if player.is_none() {
            let _ = sender.send(ServerMessage::Error(ServerError {
                code: ErrorCode::NotIdentified,
                message: "Must identify first".to_string(),
            })).await;
        }
        player
    }

    /// Drop connections that have gone silent.
    async fn run_cleanup_loop(clients: Clients, idle_timeout: Duration) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;
            Self::evict_idle(&clients, idle_timeout).await;
        }
    }

    /// Evict every client idle past the timeout. Removing the map entry
    /// alone would leave the socket open until the peer disconnects, so
    /// the connection task is signalled to shut down too.
    async fn evict_idle(clients: &Clients, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<_> = {
            let clients = clients.read().await;
            clients.iter()
                .filter(|(_, c)| now.duration_since(c.last_activity) > idle_timeout)
                .map(|(addr, _)| *addr)
                .collect()
        };

        let mut evicted = 0;
        for addr in stale {
            let mut clients = clients.write().await;
            if let Some(client) = clients.remove(&addr) {
                let _ = client.close.try_send(());
                info!("Removed idle client {}", addr);
                evicted += 1;
            }
        }
        evicted
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::balance::InMemoryBalances;
    use crate::boundary::entropy::LocalEntropy;
    use crate::boundary::persistence::InMemoryRoundStore;
    use crate::game::engine::{CrashEngine, EngineConfig, EngineDeps};
    use crate::game::slide::SlideEngine;

    fn test_server() -> GameServer {
        let deps = EngineDeps {
            entropy: Arc::new(LocalEntropy),
            balances: Arc::new(InMemoryBalances::new()),
            store: Arc::new(InMemoryRoundStore::new()),
        };
        let store: Arc<dyn RoundStore> = Arc::new(InMemoryRoundStore::new());
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        GameServer::new(
            config,
            CrashEngine::spawn(EngineConfig::default(), deps.clone()),
            SlideEngine::spawn(EngineConfig::slide_defaults(), deps),
            store,
        )
    }

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.max_history_page, 100);
    }

    #[tokio::test]
    async fn server_starts_empty() {
        let server = test_server();
        assert_eq!(server.connection_count().await, 0);
    }

    #[tokio::test]
    async fn server_shutdown_is_idempotent() {
        let server = test_server();
        server.shutdown();
        server.shutdown();
    }

    #[tokio::test]
    async fn idle_eviction_signals_the_connection_task() {
        let clients: Clients = Arc::new(RwLock::new(BTreeMap::new()));
        let (msg_tx, _msg_rx) = mpsc::channel(1);
        let (close_tx, mut close_rx) = mpsc::channel(1);
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        clients.write().await.insert(addr, ConnectedClient {
            player_id: None,
            last_activity: Instant::now(),
            sender: msg_tx,
            close: close_tx,
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        let evicted = GameServer::evict_idle(&clients, Duration::ZERO).await;
        assert_eq!(evicted, 1);
        assert!(clients.read().await.is_empty());
        // The connection task is told to stop, not just forgotten.
        assert!(close_rx.recv().await.is_some());
    }
}
