//! Session hub: the store, the shared room and the GM slot behind one
//! handle that every connection task holds.
//!
//! Each operation that reads or changes the session runs inside a single
//! store lock, broadcasting included, so:
//! - two edits never interleave (no stale base, no lost commit),
//! - a snapshot and its image leave back to back, in commit order,
//! - a joining connection subscribes under the same lock that produces its
//!   direct snapshot, so every later broadcast reaches it afterwards,
//! - a connection that lagged resubscribes the same way through `resync`.
//!
//! All methods are blocking; async callers go through
//! `tokio::task::spawn_blocking`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use umbra_core::{SavedSession, StateDelta, Token, TokenCommand};
use uuid::Uuid;

use crate::broadcast::BroadcastGroup;
use crate::protocol::{Hello, MessageType, ProtocolError, Role, SyncMessage};
use crate::registry::GmSlot;
use crate::store::{Outbound, SessionError, SessionStore};

/// A connection's entry into the room: its receiver plus the frames to
/// send it directly, in order, before forwarding anything from the
/// receiver.
pub struct JoinTicket {
    pub receiver: broadcast::Receiver<Arc<Vec<u8>>>,
    pub frames: Vec<SyncMessage>,
}

pub struct SessionHub {
    store: Mutex<SessionStore>,
    group: BroadcastGroup,
    gm: GmSlot,
    gm_key: Option<String>,
    /// Send order of server frames
    seq: AtomicU64,
}

impl SessionHub {
    pub fn new(store: SessionStore, group: BroadcastGroup) -> Self {
        Self {
            store: Mutex::new(store),
            group,
            gm: GmSlot::new(),
            gm_key: None,
            seq: AtomicU64::new(1),
        }
    }

    /// Require this key in GM hellos.
    pub fn with_gm_key(mut self, key: Option<String>) -> Self {
        self.gm_key = key.filter(|k| !k.is_empty());
        self
    }

    /// Lock the store. A poisoned lock still holds the last committed
    /// state, since the store only mutates after every fallible step.
    fn lock_store(&self) -> MutexGuard<'_, SessionStore> {
        self.store.lock().unwrap_or_else(|poisoned| {
            log::error!("session lock poisoned; continuing with last committed state");
            poisoned.into_inner()
        })
    }

    fn stamp(&self, msg: SyncMessage) -> SyncMessage {
        msg.with_seq(self.seq.fetch_add(1, Ordering::Relaxed))
    }

    fn send(&self, msg: SyncMessage) -> Result<usize, ProtocolError> {
        self.group.broadcast(&self.stamp(msg))
    }

    /// Snapshot then image; caller holds the store lock.
    fn broadcast_outbound(&self, out: Outbound) -> Result<usize, ProtocolError> {
        let receivers = self.send(SyncMessage::state_update(&out.snapshot)?)?;
        if let Some(image) = out.image {
            self.send(SyncMessage::map_image(image))?;
        }
        Ok(receivers)
    }

    /// Decide the role a hello gets.
    pub fn handshake(&self, connection_id: Uuid, hello: &Hello) -> Result<Role, SessionError> {
        match hello.role {
            Role::Viewer => Ok(Role::Viewer),
            Role::Gm => {
                if let Some(expected) = &self.gm_key {
                    if hello.key.as_deref() != Some(expected.as_str()) {
                        log::warn!("gm slot refused id={connection_id} reason=bad-key");
                        return Err(SessionError::Unauthorized(format!(
                            "connection {connection_id} presented a wrong GM key"
                        )));
                    }
                }
                self.gm.claim(connection_id)?;
                Ok(Role::Gm)
            }
        }
    }

    /// Direct frames for a connection entering (or re-entering) the room.
    /// Caller holds the store lock and has already subscribed.
    fn ticket(
        &self,
        store: &mut SessionStore,
        receiver: broadcast::Receiver<Arc<Vec<u8>>>,
    ) -> Result<JoinTicket, SessionError> {
        let payload = store.join();
        let mut frames = vec![self.stamp(SyncMessage::state_update(&payload.snapshot)?)];
        if let Some(image) = payload.image {
            frames.push(self.stamp(SyncMessage::map_image(image)));
        }
        frames.push(self.stamp(SyncMessage::tokens_update(&payload.tokens)?));
        Ok(JoinTicket { receiver, frames })
    }

    /// Enter the shared room.
    pub fn join(&self, connection_id: Uuid, role: Role) -> Result<JoinTicket, SessionError> {
        let mut store = self.lock_store();
        let receiver = self.group.join(connection_id, role);
        let ticket = self.ticket(&mut store, receiver)?;
        let has_image = ticket
            .frames
            .iter()
            .any(|f| f.msg_type == MessageType::MapImage);
        log::info!(
            "join payload id={connection_id} image={has_image} tokens={}",
            store.tokens().len()
        );
        Ok(ticket)
    }

    /// Catch up a member whose receiver fell behind: a new receiver plus the
    /// current state, image and tokens, as on join. Frames still queued on
    /// the old receiver are superseded and must be discarded.
    pub fn resync(&self, connection_id: Uuid) -> Result<JoinTicket, SessionError> {
        let mut store = self.lock_store();
        let receiver = self.group.subscribe();
        let ticket = self.ticket(&mut store, receiver)?;
        log::info!("resync payload id={connection_id} frames={}", ticket.frames.len());
        Ok(ticket)
    }

    /// Reject a non-GM caller. Checked under the store lock so a release
    /// racing the check cannot let a stale GM commit.
    fn ensure_gm(&self, connection_id: Uuid, action: &str) -> Result<(), SessionError> {
        if self.gm.is_gm(&connection_id) {
            return Ok(());
        }
        log::warn!("{action} rejected reason=unauthorized id={connection_id}");
        Err(SessionError::Unauthorized(format!(
            "connection {connection_id} is not the GM"
        )))
    }

    /// Apply a GM edit and broadcast the result.
    pub fn submit_edit(&self, connection_id: Uuid, delta: &StateDelta) -> Result<usize, SessionError> {
        let mut store = self.lock_store();
        self.ensure_gm(connection_id, "edit")?;
        let out = store.commit_edit(delta)?;
        Ok(self.broadcast_outbound(out)?)
    }

    /// Apply a GM token command and broadcast the collection.
    pub fn token_command(
        &self,
        connection_id: Uuid,
        command: TokenCommand,
    ) -> Result<Vec<Token>, SessionError> {
        let mut store = self.lock_store();
        self.ensure_gm(connection_id, &format!("token {}", command.name()))?;
        let tokens = store.mutate_token(command)?;
        self.send(SyncMessage::tokens_update(&tokens)?)?;
        Ok(tokens)
    }

    /// Adopt a saved session and broadcast state, image and tokens.
    pub fn adopt(&self, saved: SavedSession) -> Result<usize, SessionError> {
        let mut store = self.lock_store();
        let out = store.adopt(saved)?;
        let receivers = self.broadcast_outbound(out)?;
        self.send(SyncMessage::tokens_update(store.tokens())?)?;
        Ok(receivers)
    }

    pub fn saved_session(&self) -> Option<SavedSession> {
        self.lock_store().saved_session()
    }

    /// Forget a closed connection: GM slot (if held) and room membership.
    pub fn leave(&self, connection_id: &Uuid) {
        self.gm.release(connection_id);
        self.group.leave(connection_id);
    }

    pub fn group(&self) -> &BroadcastGroup {
        &self.group
    }

    pub fn gm(&self) -> &GmSlot {
        &self.gm
    }

    /// Run `f` against the locked store.
    pub fn with_store<R>(&self, f: impl FnOnce(&SessionStore) -> R) -> R {
        f(&self.lock_store())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DirectoryCatalog;
    use image::{ImageFormat, Rgb, RgbImage};
    use tempfile::TempDir;
    use umbra_core::{EffectCatalog, HiddenRegion, MapDirective, PublicContent};
    use umbra_render::Compositor;

    fn hub_with_map() -> (TempDir, SessionHub) {
        hub_with_capacity(64)
    }

    fn hub_with_capacity(capacity: usize) -> (TempDir, SessionHub) {
        let dir = TempDir::new().unwrap();
        let maps = dir.path().join("maps");
        std::fs::create_dir_all(&maps).unwrap();
        RgbImage::from_pixel(16, 16, Rgb([200, 200, 200]))
            .save_with_format(maps.join("a.png"), ImageFormat::Png)
            .unwrap();

        let store = SessionStore::new(
            EffectCatalog::builtin(),
            Arc::new(DirectoryCatalog::new(maps)),
            Arc::new(Compositor::new()),
        );
        (dir, SessionHub::new(store, BroadcastGroup::new("test", capacity)))
    }

    fn gm_hello() -> Hello {
        Hello {
            role: Role::Gm,
            key: None,
        }
    }

    fn recv(rx: &mut broadcast::Receiver<Arc<Vec<u8>>>) -> SyncMessage {
        SyncMessage::decode(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn test_second_gm_refused_first_keeps_control() {
        let (_dir, hub) = hub_with_map();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(hub.handshake(first, &gm_hello()).unwrap(), Role::Gm);
        assert!(matches!(
            hub.handshake(second, &gm_hello()),
            Err(SessionError::DuplicatePrivilegedConnection(_))
        ));
        hub.submit_edit(first, &StateDelta::default().with_scale(2.0))
            .unwrap();
        assert_eq!(hub.gm().holder(), Some(first));
    }

    #[test]
    fn test_gm_key_required_when_configured() {
        let (_dir, hub) = hub_with_map();
        let hub = hub.with_gm_key(Some("s3cret".into()));
        let id = Uuid::new_v4();

        assert!(matches!(
            hub.handshake(id, &gm_hello()),
            Err(SessionError::Unauthorized(_))
        ));
        assert!(hub.gm().holder().is_none());

        let hello = Hello {
            role: Role::Gm,
            key: Some("s3cret".into()),
        };
        assert_eq!(hub.handshake(id, &hello).unwrap(), Role::Gm);
    }

    #[test]
    fn test_viewer_edit_rejected_without_broadcast() {
        let (_dir, hub) = hub_with_map();
        let viewer = Uuid::new_v4();
        hub.handshake(viewer, &Hello { role: Role::Viewer, key: None }).unwrap();
        let mut ticket = hub.join(viewer, Role::Viewer).unwrap();

        let err = hub
            .submit_edit(viewer, &StateDelta::default().with_scale(9.0))
            .unwrap_err();
        assert!(matches!(err, SessionError::Unauthorized(_)));
        assert!(ticket.receiver.try_recv().is_err());
        assert_eq!(
            hub.with_store(|s| s.state().map(|st| st.view.scale)),
            Some(1.0)
        );

        let err = hub
            .token_command(viewer, TokenCommand::Remove { token_id: "x".into() })
            .unwrap_err();
        assert!(matches!(err, SessionError::Unauthorized(_)));
    }

    #[test]
    fn test_join_frames_in_order() {
        let (_dir, hub) = hub_with_map();
        let gm = Uuid::new_v4();
        hub.handshake(gm, &gm_hello()).unwrap();
        hub.submit_edit(
            gm,
            &StateDelta::default().with_map(MapDirective::Switch("maps/a.png".into())),
        )
        .unwrap();

        let ticket = hub.join(Uuid::new_v4(), Role::Viewer).unwrap();
        let types: Vec<_> = ticket.frames.iter().map(|f| f.msg_type).collect();
        assert_eq!(
            types,
            vec![
                MessageType::StateUpdate,
                MessageType::MapImage,
                MessageType::TokensUpdate
            ]
        );
        assert!(ticket.frames.windows(2).all(|w| w[0].seq < w[1].seq));
        let snapshot = ticket.frames[0].snapshot().unwrap();
        assert_eq!(snapshot.content, PublicContent::PendingBinary);
    }

    #[test]
    fn test_edit_broadcasts_state_then_image() {
        let (_dir, hub) = hub_with_map();
        let gm = Uuid::new_v4();
        hub.handshake(gm, &gm_hello()).unwrap();
        let mut ticket = hub.join(Uuid::new_v4(), Role::Viewer).unwrap();

        let delta = StateDelta::default()
            .with_map(MapDirective::Switch("a.png".into()))
            .with_hidden_regions(vec![HiddenRegion::new(
                vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)],
                "#000",
            )]);
        assert_eq!(hub.submit_edit(gm, &delta).unwrap(), 1);

        let state = recv(&mut ticket.receiver);
        assert_eq!(state.msg_type, MessageType::StateUpdate);
        assert_eq!(state.snapshot().unwrap().content, PublicContent::PendingBinary);
        let image = recv(&mut ticket.receiver);
        assert_eq!(image.msg_type, MessageType::MapImage);
        assert_eq!(&image.payload[..2], &[0xFF, 0xD8]);
        assert!(state.seq < image.seq);
    }

    #[test]
    fn test_token_command_broadcasts_only_tokens() {
        let (_dir, hub) = hub_with_map();
        let gm = Uuid::new_v4();
        hub.handshake(gm, &gm_hello()).unwrap();
        let mut ticket = hub.join(gm, Role::Gm).unwrap();

        let tokens = hub
            .token_command(
                gm,
                TokenCommand::Place {
                    label: Some("AB".into()),
                    color: Some("#0000ff".into()),
                    x: Some(0.3),
                    y: Some(0.4),
                },
            )
            .unwrap();

        let msg = recv(&mut ticket.receiver);
        assert_eq!(msg.msg_type, MessageType::TokensUpdate);
        assert_eq!(msg.tokens().unwrap(), tokens);
        assert!(ticket.receiver.try_recv().is_err());
    }

    #[test]
    fn test_leave_releases_gm_slot() {
        let (_dir, hub) = hub_with_map();
        let gm = Uuid::new_v4();
        hub.handshake(gm, &gm_hello()).unwrap();
        let _ticket = hub.join(gm, Role::Gm).unwrap();
        hub.submit_edit(gm, &StateDelta::default().with_scale(3.0)).unwrap();

        hub.leave(&gm);
        assert!(hub.gm().holder().is_none());
        assert_eq!(hub.group().member_count(), 0);

        // State survives; a new GM resumes it.
        let next = Uuid::new_v4();
        hub.handshake(next, &gm_hello()).unwrap();
        assert_eq!(
            hub.with_store(|s| s.state().map(|st| st.view.scale)),
            Some(3.0)
        );
    }

    #[test]
    fn test_adopt_broadcasts_state_image_tokens() {
        let (_dir, hub) = hub_with_map();
        let mut ticket = hub.join(Uuid::new_v4(), Role::Viewer).unwrap();

        let mut saved = hub.saved_session().unwrap();
        saved.state.source = Some("maps/a.png".into());
        hub.adopt(saved).unwrap();

        let kinds: Vec<_> = (0..3).map(|_| recv(&mut ticket.receiver).msg_type).collect();
        assert_eq!(
            kinds,
            vec![
                MessageType::StateUpdate,
                MessageType::MapImage,
                MessageType::TokensUpdate
            ]
        );
    }

    #[test]
    fn test_released_gm_cannot_edit() {
        let (_dir, hub) = hub_with_map();
        let gm = Uuid::new_v4();
        hub.handshake(gm, &gm_hello()).unwrap();
        hub.leave(&gm);

        assert!(matches!(
            hub.submit_edit(gm, &StateDelta::default().with_scale(4.0)),
            Err(SessionError::Unauthorized(_))
        ));
        assert!(matches!(
            hub.token_command(gm, TokenCommand::Remove { token_id: "x".into() }),
            Err(SessionError::Unauthorized(_))
        ));
        assert_eq!(
            hub.with_store(|s| s.state().map(|st| st.view.scale)),
            Some(1.0)
        );
    }

    #[test]
    fn test_lagged_member_resyncs_to_latest_scene() {
        let (_dir, hub) = hub_with_capacity(2);
        let gm = Uuid::new_v4();
        hub.handshake(gm, &gm_hello()).unwrap();
        let viewer = Uuid::new_v4();
        let mut ticket = hub.join(viewer, Role::Viewer).unwrap();

        hub.submit_edit(gm, &StateDelta::default().with_map(MapDirective::Switch("a.png".into())))
            .unwrap();
        for scale in [2.0, 3.0, 4.0, 5.0] {
            hub.submit_edit(gm, &StateDelta::default().with_scale(scale)).unwrap();
        }
        assert!(matches!(
            ticket.receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));

        let mut resynced = hub.resync(viewer).unwrap();
        let types: Vec<_> = resynced.frames.iter().map(|f| f.msg_type).collect();
        assert_eq!(
            types,
            vec![
                MessageType::StateUpdate,
                MessageType::MapImage,
                MessageType::TokensUpdate
            ]
        );
        let snapshot = resynced.frames[0].snapshot().unwrap();
        assert_eq!(snapshot.view.scale, 5.0);
        assert!(resynced.receiver.try_recv().is_err());
        assert_eq!(hub.group().member_count(), 1);

        hub.submit_edit(gm, &StateDelta::default().with_scale(6.0)).unwrap();
        let next = recv(&mut resynced.receiver);
        assert_eq!(next.snapshot().unwrap().view.scale, 6.0);
        assert!(next.seq > resynced.frames[2].seq);
    }

    #[test]
    fn test_concurrent_edits_serialize() {
        let (_dir, hub) = hub_with_capacity(1024);
        let hub = Arc::new(hub);
        let gm = Uuid::new_v4();
        hub.handshake(gm, &gm_hello()).unwrap();
        hub.submit_edit(gm, &StateDelta::default().with_map(MapDirective::Switch("a.png".into())))
            .unwrap();
        let mut ticket = hub.join(Uuid::new_v4(), Role::Viewer).unwrap();

        // Each thread owns one view field and also replaces the regions, so
        // every commit carries an image.
        let edits: Vec<serde_json::Value> = vec![
            serde_json::json!({"view_state": {"center_x": 0.25}}),
            serde_json::json!({"view_state": {"center_y": 0.75}}),
            serde_json::json!({"view_state": {"scale": 3.0}}),
            serde_json::json!({"current_filter": "none"}),
        ];
        let threads: Vec<_> = edits
            .into_iter()
            .enumerate()
            .map(|(i, fields)| {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    for round in 0..5 {
                        let (w, h) = (0.1 * (i + 1) as f64, 0.1 * (round + 1) as f64);
                        let region =
                            HiddenRegion::new(vec![(0.0, 0.0), (w, 0.0), (0.0, h)], "#000");
                        let delta = StateDelta::from_value(fields.clone())
                            .unwrap()
                            .with_hidden_regions(vec![region]);
                        hub.submit_edit(gm, &delta).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let (center_x, center_y, scale) = hub.with_store(|s| {
            let view = &s.state().unwrap().view;
            (view.center_x, view.center_y, view.scale)
        });
        assert_eq!((center_x, center_y, scale), (0.25, 0.75, 3.0));

        // 20 commits, each a snapshot immediately followed by its image.
        let mut last_seq = 0;
        for _ in 0..20 {
            let state = recv(&mut ticket.receiver);
            let image = recv(&mut ticket.receiver);
            assert_eq!(state.msg_type, MessageType::StateUpdate);
            assert_eq!(state.snapshot().unwrap().content, PublicContent::PendingBinary);
            assert_eq!(image.msg_type, MessageType::MapImage);
            assert!(last_seq < state.seq && state.seq + 1 == image.seq);
            last_seq = image.seq;
        }
        assert!(ticket.receiver.try_recv().is_err());
    }
}
