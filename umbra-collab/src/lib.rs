//! # umbra-collab: Real-time session sync for Umbra
//!
//! One GM edits the authoritative scene; any number of viewers receive a
//! redacted copy of it over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     WebSocket      ┌─────────────┐
//! │ SessionClient │ ◄────────────────► │ SyncServer  │
//! │ (GM / viewer) │    Binary Proto    │ (central)   │
//! └───────────────┘                    └──────┬──────┘
//!                                             │ spawn_blocking
//!                                             ▼
//!                                      ┌─────────────┐
//!                                      │ SessionHub  │── GmSlot
//!                                      └──────┬──────┘
//!                                 ┌───────────┼────────────┐
//!                                 ▼           ▼            ▼
//!                          SessionStore   MapCatalog   BroadcastGroup
//!                          (state+tokens) Compositor   (fan-out)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Binary wire protocol (bincode-encoded SyncMessage)
//! - [`broadcast`]: Room fan-out with backpressure
//! - [`registry`]: The single GM slot
//! - [`catalog`]: Map availability and per-map saved settings
//! - [`store`]: Authoritative state, edit pipeline, tokens
//! - [`session`]: Store, room and GM slot behind one lock
//! - [`server`]: WebSocket session server
//! - [`client`]: WebSocket session client

pub mod broadcast;
pub mod catalog;
pub mod client;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, Member, ROOM_NAME};
pub use catalog::{CatalogError, DirectoryCatalog, MapCatalog, DEFAULT_MAP};
pub use client::{ConnectionState, SessionClient, SessionEvent};
pub use protocol::{Hello, MessageType, ProtocolError, Role, SyncMessage, Welcome};
pub use registry::GmSlot;
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{JoinTicket, SessionHub};
pub use store::{JoinPayload, Outbound, SessionError, SessionStore};
