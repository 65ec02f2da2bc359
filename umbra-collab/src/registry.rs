//! The single privileged (GM) connection slot.
//!
//! At most one connection holds the slot. A second claim is refused and
//! the holder keeps control; releasing the slot never touches session
//! state, so a reconnecting GM resumes where the last one left off.

use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::store::SessionError;

#[derive(Debug, Default)]
pub struct GmSlot {
    holder: Mutex<Option<Uuid>>,
}

impl GmSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Uuid>> {
        self.holder.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the slot for `connection_id`.
    ///
    /// Claiming again with the current holder is a no-op.
    pub fn claim(&self, connection_id: Uuid) -> Result<(), SessionError> {
        let mut holder = self.lock();
        match *holder {
            Some(current) if current != connection_id => {
                log::warn!("gm slot refused id={connection_id} holder={current}");
                Err(SessionError::DuplicatePrivilegedConnection(current))
            }
            Some(_) => Ok(()),
            None => {
                *holder = Some(connection_id);
                log::info!("gm slot acquired id={connection_id}");
                Ok(())
            }
        }
    }

    /// Release the slot if `connection_id` holds it.
    pub fn release(&self, connection_id: &Uuid) -> bool {
        let mut holder = self.lock();
        if holder.as_ref() == Some(connection_id) {
            *holder = None;
            log::info!("gm slot released id={connection_id}");
            true
        } else {
            false
        }
    }

    pub fn holder(&self) -> Option<Uuid> {
        *self.lock()
    }

    pub fn is_gm(&self, connection_id: &Uuid) -> bool {
        self.lock().as_ref() == Some(connection_id)
    }
}
