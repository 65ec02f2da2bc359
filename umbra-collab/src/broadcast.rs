//! Fan-out broadcast to every connection in the shared room.
//!
//! Uses a tokio broadcast channel for O(1) send to all subscribers.
//! Each member gets an independent receiver that buffers up to `capacity`
//! frames; a receiver that falls further behind loses the oldest frames.
//!
//! There is exactly one group per process, created at startup. Sending
//! never blocks, so callers may broadcast while holding the session lock
//! and frames leave in commit order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::protocol::{ProtocolError, Role, SyncMessage};

/// Default name of the shared room.
pub const ROOM_NAME: &str = "game";

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_members: usize,
}

/// Atomic broadcast stats, lock-free on the hot path.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// A joined connection.
#[derive(Debug, Clone)]
pub struct Member {
    pub connection_id: Uuid,
    pub role: Role,
    pub joined_at: Instant,
}

/// The single shared broadcast group.
pub struct BroadcastGroup {
    name: String,

    sender: broadcast::Sender<Arc<Vec<u8>>>,

    /// Joined connections
    members: RwLock<HashMap<Uuid, Member>>,

    /// Channel capacity (frames buffered per receiver)
    capacity: usize,

    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// Create the group with the given buffer capacity.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            name: name.into(),
            sender,
            members: RwLock::new(HashMap::new()),
            capacity,
            atomic_stats: AtomicBroadcastStats::new(),
        }
    }

    fn read_members(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Member>> {
        self.members.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_members(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Member>> {
        self.members.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a connection and return its receiver.
    ///
    /// Frames broadcast after this call are buffered in the receiver, so a
    /// caller that sends a direct snapshot first and drains the receiver
    /// afterwards sees nothing out of order.
    pub fn join(&self, connection_id: Uuid, role: Role) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let rx = self.sender.subscribe();
        let rejoin = self
            .write_members()
            .insert(
                connection_id,
                Member {
                    connection_id,
                    role,
                    joined_at: Instant::now(),
                },
            )
            .is_some();
        log::info!(
            "connection joined id={connection_id} role={role} room={} rejoin={rejoin}",
            self.name
        );
        rx
    }

    /// A fresh receiver for an existing member, starting at the next frame.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }

    /// Remove a connection. Returns whether it was a member.
    pub fn leave(&self, connection_id: &Uuid) -> Option<Member> {
        let member = self.write_members().remove(connection_id);
        if member.is_some() {
            log::info!("connection left id={connection_id} room={}", self.name);
        }
        member
    }

    /// Encode and send a frame to every member.
    ///
    /// Returns the number of receivers that got it.
    pub fn broadcast(&self, msg: &SyncMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Broadcast pre-encoded bytes directly.
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Account for frames a lagging receiver skipped.
    pub fn record_dropped(&self, n: u64) {
        self.atomic_stats
            .messages_dropped
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn member_count(&self) -> usize {
        self.read_members().len()
    }

    pub fn members(&self) -> Vec<Member> {
        self.read_members().values().cloned().collect()
    }

    pub fn is_member(&self, connection_id: &Uuid) -> bool {
        self.read_members().contains_key(connection_id)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_members: self.member_count(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BroadcastGroup {
    fn default() -> Self {
        Self::new(ROOM_NAME, 256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_leave() {
        let group = BroadcastGroup::new("test", 16);
        let id = Uuid::new_v4();

        let _rx = group.join(id, Role::Viewer);
        assert_eq!(group.member_count(), 1);
        assert!(group.is_member(&id));

        let member = group.leave(&id).unwrap();
        assert_eq!(member.role, Role::Viewer);
        assert_eq!(group.member_count(), 0);
        assert!(group.leave(&id).is_none());
    }

    #[tokio::test]
    async fn test_fan_out_reaches_everyone() {
        let group = BroadcastGroup::new("test", 16);
        let mut rx1 = group.join(Uuid::new_v4(), Role::Gm);
        let mut rx2 = group.join(Uuid::new_v4(), Role::Viewer);
        let mut rx3 = group.join(Uuid::new_v4(), Role::Viewer);

        let count = group.broadcast(&SyncMessage::map_image(vec![1, 2, 3])).unwrap();
        assert_eq!(count, 3);

        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let bytes = rx.recv().await.unwrap();
            let msg = SyncMessage::decode(&bytes).unwrap();
            assert_eq!(msg.payload, vec![1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn test_frames_arrive_in_send_order() {
        let group = BroadcastGroup::new("test", 16);
        let mut rx = group.join(Uuid::new_v4(), Role::Viewer);

        for seq in 1..=5 {
            group
                .broadcast(&SyncMessage::pong(Uuid::nil()).with_seq(seq))
                .unwrap();
        }
        for seq in 1..=5 {
            let msg = SyncMessage::decode(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(msg.seq, seq);
        }
    }

    #[tokio::test]
    async fn test_no_members_is_not_an_error() {
        let group = BroadcastGroup::new("test", 4);
        let count = group.broadcast(&SyncMessage::ping(Uuid::nil())).unwrap();
        assert_eq!(count, 0);
        assert_eq!(group.stats().messages_sent, 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let group = BroadcastGroup::new("test", 16);
        let _rx = group.join(Uuid::new_v4(), Role::Viewer);

        group.broadcast_raw(Arc::new(vec![1]));
        group.broadcast_raw(Arc::new(vec![2]));
        group.record_dropped(3);

        let stats = group.stats();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_dropped, 3);
        assert_eq!(stats.active_members, 1);
    }

    #[tokio::test]
    async fn test_lagging_receiver() {
        let group = BroadcastGroup::new("test", 2);
        let mut rx = group.join(Uuid::new_v4(), Role::Viewer);
        for i in 0..5u8 {
            group.broadcast_raw(Arc::new(vec![i]));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
    }
}
