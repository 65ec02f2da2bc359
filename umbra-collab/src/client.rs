//! WebSocket session client.
//!
//! Provides:
//! - the hello handshake (`connect` resolves once the server welcomes or
//!   refuses the connection),
//! - GM edits and token commands,
//! - a stream of [`SessionEvent`]s for state, image and token frames.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use umbra_core::{PublicSnapshot, StateDelta, Token, TokenCommand};
use uuid::Uuid;

use crate::protocol::{MessageType, ProtocolError, Role, SyncMessage};

/// How long `connect` waits for the server's verdict.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Events emitted by the session client.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Public document, sent on join and after every committed edit
    State { seq: u64, snapshot: PublicSnapshot },
    /// Redacted map image; follows the `State` it belongs to
    MapImage { seq: u64, bytes: Vec<u8> },
    /// Full token collection
    Tokens { seq: u64, tokens: Vec<Token> },
    /// Application-level pong
    Pong,
    /// Connection lost
    Disconnected,
}

/// A connected, welcomed session client.
pub struct SessionClient {
    connection_id: Uuid,
    role: Role,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: mpsc::Sender<Vec<u8>>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
}

impl SessionClient {
    /// Connect, say hello, and wait for the server's verdict.
    ///
    /// A refused hello comes back as [`ProtocolError::Refused`].
    pub async fn connect(
        url: &str,
        role: Role,
        key: Option<String>,
    ) -> Result<Self, ProtocolError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let hello = SyncMessage::hello(role, key)?.encode()?;
        ws_writer
            .send(Message::Binary(hello.into()))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        let verdict = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => return SyncMessage::decode(&data),
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            Err(ProtocolError::ConnectionClosed)
        })
        .await
        .map_err(|_| ProtocolError::Timeout)??;

        let welcome = match verdict.msg_type {
            MessageType::Welcome => verdict.welcome_payload()?,
            MessageType::Refused => return Err(ProtocolError::Refused(verdict.refusal_reason()?)),
            _ => return Err(ProtocolError::InvalidMessageType),
        };
        log::info!(
            "Welcomed as {} id={}",
            welcome.role,
            welcome.connection_id
        );

        let state = Arc::new(RwLock::new(ConnectionState::Connected));

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: turn server frames into events
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(256);
        let reader_state = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let Ok(sync_msg) = SyncMessage::decode(&data) else {
                            log::warn!("Dropping undecodable server frame");
                            continue;
                        };
                        let event = match sync_msg.msg_type {
                            MessageType::StateUpdate => sync_msg
                                .snapshot()
                                .ok()
                                .map(|snapshot| SessionEvent::State {
                                    seq: sync_msg.seq,
                                    snapshot,
                                }),
                            MessageType::MapImage => Some(SessionEvent::MapImage {
                                seq: sync_msg.seq,
                                bytes: sync_msg.payload,
                            }),
                            MessageType::TokensUpdate => {
                                sync_msg.tokens().ok().map(|tokens| SessionEvent::Tokens {
                                    seq: sync_msg.seq,
                                    tokens,
                                })
                            }
                            MessageType::Pong => Some(SessionEvent::Pong),
                            _ => None,
                        };
                        if let Some(evt) = event {
                            if event_tx.send(evt).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *reader_state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SessionEvent::Disconnected).await;
        });

        Ok(Self {
            connection_id: welcome.connection_id,
            role: welcome.role,
            state,
            outgoing_tx: out_tx,
            event_rx: Some(event_rx),
        })
    }

    async fn send(&self, msg: SyncMessage) -> Result<(), ProtocolError> {
        let encoded = msg.encode()?;
        self.outgoing_tx
            .send(encoded)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Enter the room; the server answers with state, image and tokens.
    pub async fn join(&self) -> Result<(), ProtocolError> {
        self.send(SyncMessage::join(self.connection_id)).await
    }

    /// Submit a GM edit.
    pub async fn send_edit(&self, delta: &StateDelta) -> Result<(), ProtocolError> {
        self.send(SyncMessage::gm_update(self.connection_id, delta)?)
            .await
    }

    /// Submit a GM edit as a raw JSON document.
    pub async fn send_edit_json(&self, json: &serde_json::Value) -> Result<(), ProtocolError> {
        let bytes =
            serde_json::to_vec(json).map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        self.send(SyncMessage::gm_update_raw(self.connection_id, bytes))
            .await
    }

    pub async fn send_token_command(&self, command: &TokenCommand) -> Result<(), ProtocolError> {
        self.send(SyncMessage::token_command(self.connection_id, command)?)
            .await
    }

    /// Send a ping to the server.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send(SyncMessage::ping(self.connection_id)).await
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Next event, or `Timeout` after `limit`.
    pub async fn next_event(&mut self, limit: Duration) -> Result<SessionEvent, ProtocolError> {
        let rx = self
            .event_rx
            .as_mut()
            .ok_or(ProtocolError::ConnectionClosed)?;
        match tokio::time::timeout(limit, rx.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(ProtocolError::ConnectionClosed),
            Err(_) => Err(ProtocolError::Timeout),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn role(&self) -> Role {
        self.role
    }
}
