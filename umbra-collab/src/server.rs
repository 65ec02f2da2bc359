//! WebSocket session server.
//!
//! Architecture:
//! ```text
//! GM ────────┐                       ┌── SessionStore (state + tokens)
//!             ├── connection task ──▶│   MapCatalog, Compositor
//! Viewer A ──┤   (spawn_blocking)    ├── GmSlot
//! Viewer B ──┘                       └── BroadcastGroup ──▶ every joined connection
//! ```
//!
//! Per connection:
//! 1. the first binary frame must be `Hello`; the reply is `Welcome` or
//!    `Refused` (then close),
//! 2. `Join` sends state, image, tokens directly, then forwards room
//!    broadcasts,
//! 3. `GmUpdate` / `TokenCommand` are applied through the hub,
//! 4. a WebSocket ping goes out every heartbeat interval,
//! 5. a connection that falls behind the room gets the current state,
//!    image and tokens again, then resumes forwarding,
//! 6. however the connection ends, the GM slot and room membership are
//!    released.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use umbra_core::{EffectCatalog, EffectDefinition};
use umbra_render::Compositor;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, ROOM_NAME};
use crate::catalog::{DirectoryCatalog, DEFAULT_MAP};
use crate::protocol::{Hello, MessageType, Role, SyncMessage};
use crate::session::SessionHub;
use crate::store::SessionStore;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// How long a new connection may take to say hello.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Releases the GM slot and room membership of a connection when dropped,
/// whichever way its task ends.
struct Departure {
    hub: Arc<SessionHub>,
    connection_id: Uuid,
}

impl Drop for Departure {
    fn drop(&mut self) {
        self.hub.leave(&self.connection_id);
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per connection before it starts losing the oldest
    pub broadcast_capacity: usize,
    /// WebSocket ping interval in seconds
    pub heartbeat_interval_secs: u64,
    /// Directory holding the private map images
    pub maps_dir: PathBuf,
    /// Directory holding per-map `<name>_config.json` files
    pub configs_dir: PathBuf,
    /// Directory for disk-backed composites (cleared at startup)
    pub generated_dir: PathBuf,
    /// Map a new session starts with, when present in `maps_dir`
    pub default_map: String,
    /// JPEG quality of the redacted image
    pub jpeg_quality: u8,
    /// Shared secret GM connections must present (None = any GM hello)
    pub gm_key: Option<String>,
    /// Effects known besides `"none"`
    pub effects: Vec<EffectDefinition>,
    /// Saved session (JSON) to adopt at startup
    pub saved_session: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            heartbeat_interval_secs: 30,
            maps_dir: PathBuf::from("maps"),
            configs_dir: PathBuf::from("configs"),
            generated_dir: PathBuf::from("generated_maps"),
            default_map: DEFAULT_MAP.to_string(),
            jpeg_quality: umbra_render::compositor::DEFAULT_JPEG_QUALITY,
            gm_key: None,
            effects: Vec::new(),
            saved_session: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub refused_handshakes: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
}

/// The session server.
pub struct SyncServer {
    config: ServerConfig,
    hub: Arc<SessionHub>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Serve an already assembled hub.
    pub fn new(config: ServerConfig, hub: Arc<SessionHub>) -> Self {
        Self {
            config,
            hub,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Build catalog, compositor, store and room from the configuration.
    pub fn from_config(config: ServerConfig) -> Self {
        let effects = EffectCatalog::new(config.effects.clone());
        let catalog = DirectoryCatalog::new(config.maps_dir.clone())
            .with_configs(config.configs_dir.clone())
            .with_default_map(config.default_map.clone());
        let compositor = Compositor::new().with_quality(config.jpeg_quality);
        let store = SessionStore::new(effects, Arc::new(catalog), Arc::new(compositor));
        let group = BroadcastGroup::new(ROOM_NAME, config.broadcast_capacity);
        let hub = SessionHub::new(store, group).with_gm_key(config.gm_key.clone());
        Self::new(config, Arc::new(hub))
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::from_config(ServerConfig::default())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Session server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an existing listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let stats = self.stats.clone();
            let heartbeat = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub, stats, heartbeat).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Wait for the `Hello` frame.
    async fn read_hello(ws_receiver: &mut WsSource) -> Result<Option<Hello>, BoxError> {
        while let Some(msg) = ws_receiver.next().await {
            match msg? {
                Message::Binary(data) => {
                    let msg = SyncMessage::decode(&data)?;
                    return Ok(Some(msg.hello_payload()?));
                }
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    async fn send_frame(ws_sender: &mut WsSink, msg: &SyncMessage) -> Result<(), BoxError> {
        let encoded = msg.encode()?;
        ws_sender.send(Message::Binary(encoded.into())).await?;
        Ok(())
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<SessionHub>,
        stats: Arc<RwLock<ServerStats>>,
        heartbeat: Duration,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let connection_id = Uuid::new_v4();

        log::info!("WebSocket connection established from {addr} id={connection_id}");
        stats.write().await.total_connections += 1;

        let hello = match tokio::time::timeout(HANDSHAKE_TIMEOUT, Self::read_hello(&mut ws_receiver)).await {
            Ok(Ok(Some(hello))) => hello,
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => {
                log::warn!("Bad handshake from {addr}: {e}");
                Self::send_frame(&mut ws_sender, &SyncMessage::refused("expected hello")).await?;
                let _ = ws_sender.close().await;
                return Ok(());
            }
            Err(_) => {
                log::warn!("Handshake timeout from {addr}");
                let _ = ws_sender.close().await;
                return Ok(());
            }
        };

        let decided = {
            let hub = hub.clone();
            tokio::task::spawn_blocking(move || hub.handshake(connection_id, &hello)).await?
        };
        let role = match decided {
            Ok(role) => role,
            Err(e) => {
                stats.write().await.refused_handshakes += 1;
                Self::send_frame(&mut ws_sender, &SyncMessage::refused(&e.to_string())).await?;
                let _ = ws_sender.close().await;
                return Ok(());
            }
        };
        let departure = Departure {
            hub: hub.clone(),
            connection_id,
        };
        if let Err(e) =
            Self::send_frame(&mut ws_sender, &SyncMessage::welcome(connection_id, role)?).await
        {
            log::warn!("Welcome to {addr} id={connection_id} not delivered: {e}");
            return Ok(());
        }
        stats.write().await.active_connections += 1;

        let result = Self::connection_loop(
            &mut ws_sender,
            &mut ws_receiver,
            connection_id,
            role,
            &hub,
            &stats,
            heartbeat,
        )
        .await;

        drop(departure);
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Connection closed from {addr} id={connection_id}");
        result
    }

    async fn connection_loop(
        ws_sender: &mut WsSink,
        ws_receiver: &mut WsSource,
        connection_id: Uuid,
        role: Role,
        hub: &Arc<SessionHub>,
        stats: &Arc<RwLock<ServerStats>>,
        heartbeat: Duration,
    ) -> Result<(), BoxError> {
        let mut broadcast_rx: Option<broadcast::Receiver<Arc<Vec<u8>>>> = None;
        let mut ping_timer =
            tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += data.len() as u64;
                            }
                            let sync_msg = match SyncMessage::decode(&data) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Failed to decode message from {connection_id}: {e}");
                                    continue;
                                }
                            };

                            match sync_msg.msg_type {
                                MessageType::Join => {
                                    let hub = hub.clone();
                                    let ticket = tokio::task::spawn_blocking(move || {
                                        hub.join(connection_id, role)
                                    })
                                    .await??;
                                    for frame in &ticket.frames {
                                        Self::send_frame(ws_sender, frame).await?;
                                    }
                                    broadcast_rx = Some(ticket.receiver);
                                }

                                MessageType::GmUpdate => match sync_msg.delta() {
                                    Ok(delta) => {
                                        let hub = hub.clone();
                                        let outcome = tokio::task::spawn_blocking(move || {
                                            hub.submit_edit(connection_id, &delta)
                                        })
                                        .await?;
                                        if let Err(e) = outcome {
                                            log::debug!("GM update from {connection_id} not applied: {e}");
                                        }
                                    }
                                    Err(e) => {
                                        log::warn!("edit rejected reason=malformed id={connection_id} error={e}");
                                    }
                                },

                                MessageType::TokenCommand => match sync_msg.command() {
                                    Ok(command) => {
                                        let hub = hub.clone();
                                        let outcome = tokio::task::spawn_blocking(move || {
                                            hub.token_command(connection_id, command)
                                        })
                                        .await?;
                                        if let Err(e) = outcome {
                                            log::debug!("Token command from {connection_id} not applied: {e}");
                                        }
                                    }
                                    Err(e) => {
                                        log::warn!("token command rejected reason=malformed id={connection_id} error={e}");
                                    }
                                },

                                MessageType::Ping => {
                                    Self::send_frame(ws_sender, &SyncMessage::pong(Uuid::nil())).await?;
                                }

                                MessageType::Pong => {}

                                other => {
                                    log::debug!("Unhandled message type from {connection_id}: {other:?}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => break,

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {connection_id}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing room broadcast
                msg = async {
                    match broadcast_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        // Not joined yet: wait forever
                        None => std::future::pending().await,
                    }
                } => {
                    match msg {
                        Ok(data) => {
                            ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            hub.group().record_dropped(n);
                            log::warn!("Connection {connection_id} lagged by {n} frames; resending scene");
                            let hub = hub.clone();
                            let ticket = tokio::task::spawn_blocking(move || {
                                hub.resync(connection_id)
                            })
                            .await??;
                            for frame in &ticket.frames {
                                Self::send_frame(ws_sender, frame).await?;
                            }
                            broadcast_rx = Some(ticket.receiver);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                _ = ping_timer.tick() => {
                    ws_sender.send(Message::Ping(Vec::new().into())).await?;
                }
            }
        }
        Ok(())
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
