//! Authoritative session store and the edit pipeline.
//!
//! ```text
//!  StateDelta
//!      │
//!      ▼
//!  map directive ── Switch ──▶ catalog check ── fail ──▶ InvalidEdit (no change)
//!      │                           │
//!      │ Keep                      ▼ ok
//!      ▼                      fresh map document
//!  current state                   │
//!      └──────────▶ merge() ◀──────┘          (Reset: blank document)
//!                     │
//!                     ▼
//!       regen? ── yes ──▶ compositor ── ok ──▶ marker = pending, image
//!         │                   └── err ──▶ marker = absent
//!         no ──▶ marker = previous marker
//!                     │
//!                     ▼
//!                  commit
//! ```
//!
//! The store has no locking of its own; [`crate::SessionHub`] wraps it in
//! one mutex so each edit is read-merge-composite-commit-broadcast as a
//! single unit.

use std::sync::Arc;

use thiserror::Error;
use umbra_core::{
    merge, EffectCatalog, MapDirective, PublicContent, PublicSnapshot, SavedSession,
    SessionState, StateDelta, Token, TokenBoard, TokenCommand, TokenError,
};
use umbra_render::Composite;

use crate::catalog::MapCatalog;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Source map unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Invalid edit: {0}")]
    InvalidEdit(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("A GM connection is already active ({0})")]
    DuplicatePrivilegedConnection(uuid::Uuid),
    #[error("Token command rejected: {0}")]
    Token(#[from] TokenError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),
}

/// Result of a committed edit: one snapshot, and an image when one was
/// generated for it.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub snapshot: PublicSnapshot,
    pub image: Option<Vec<u8>>,
}

/// What a newly joined connection receives, in send order.
#[derive(Debug, Clone)]
pub struct JoinPayload {
    pub snapshot: PublicSnapshot,
    pub image: Option<Vec<u8>>,
    pub tokens: Vec<Token>,
}

pub struct SessionStore {
    /// `None` until the first join, edit or load.
    state: Option<SessionState>,
    tokens: TokenBoard,
    effects: EffectCatalog,
    catalog: Arc<dyn MapCatalog>,
    compositor: Arc<dyn Composite>,
}

impl SessionStore {
    pub fn new(
        effects: EffectCatalog,
        catalog: Arc<dyn MapCatalog>,
        compositor: Arc<dyn Composite>,
    ) -> Self {
        Self {
            state: None,
            tokens: TokenBoard::new(),
            effects,
            catalog,
            compositor,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    pub fn tokens(&self) -> &[Token] {
        self.tokens.tokens()
    }

    pub fn effects(&self) -> &EffectCatalog {
        &self.effects
    }

    /// The document a new session starts from: the default map's state
    /// when that map exists, otherwise the blank document.
    fn initial_document(&self) -> SessionState {
        if let Some(reference) = self.catalog.default_map() {
            match self.catalog.state_for_map(&reference, &self.effects) {
                Ok(state) => {
                    log::info!("Using {reference} as the initial session state");
                    return state;
                }
                Err(e) => log::warn!("Default map {reference} unusable: {e}"),
            }
        }
        SessionState::blank(&self.effects)
    }

    fn activate(&mut self) -> &SessionState {
        let state = match self.state.take() {
            Some(state) => state,
            None => {
                log::info!("Creating initial session state");
                self.initial_document()
            }
        };
        self.state.insert(state)
    }

    /// Redacted image for `state`, or `None` when no map is loaded.
    fn render(&self, state: &SessionState) -> Result<Option<Vec<u8>>, SessionError> {
        let Some(source) = state.source.as_deref() else {
            return Ok(None);
        };
        let Some(path) = self.catalog.source_path(source) else {
            log::warn!("composite failed reason=unresolvable-source map={source}");
            return Err(SessionError::SourceUnavailable(source.to_string()));
        };
        match self.compositor.composite(&path, state.hidden_regions()) {
            Ok(bytes) => {
                log::info!(
                    "composite ok regions={} bytes={}",
                    state.hidden_regions().len(),
                    bytes.len()
                );
                Ok(Some(bytes))
            }
            Err(e) => {
                log::warn!("composite failed error={e}");
                Err(SessionError::SourceUnavailable(e.to_string()))
            }
        }
    }

    /// Apply a GM edit.
    ///
    /// Either the whole edit commits or nothing changes. A failed composite
    /// does not fail the edit; it commits with an absent marker instead.
    pub fn commit_edit(&mut self, delta: &StateDelta) -> Result<Outbound, SessionError> {
        let current = self.activate().clone();

        // Switching to the map already loaded is not a map change.
        let target = match &delta.map {
            MapDirective::Keep => None,
            MapDirective::Reset => Some(None),
            MapDirective::Switch(reference) => {
                let reference = reference.trim();
                if reference.is_empty() || self.is_current_map(&current, reference) {
                    None
                } else {
                    Some(Some(reference))
                }
            }
        };
        let map_changed = target.is_some();

        let base = match target {
            None => current.clone(),
            Some(None) => {
                log::info!("Map reset");
                SessionState::blank(&self.effects)
            }
            Some(Some(reference)) => {
                if !self.catalog.is_available(reference) {
                    log::warn!("edit rejected reason=unavailable-map map={reference}");
                    return Err(SessionError::InvalidEdit(format!(
                        "map '{reference}' does not exist or is not an accepted image"
                    )));
                }
                let fresh = self
                    .catalog
                    .state_for_map(reference, &self.effects)
                    .map_err(|e| {
                        log::warn!("edit rejected reason=map-state map={reference} error={e}");
                        SessionError::InvalidEdit(e.to_string())
                    })?;
                log::info!("Switching map to {reference}");
                fresh
            }
        };

        let mut next = merge(&base, delta);
        // merge never touches the private source; assign it explicitly.
        next.source = if map_changed {
            base.source.clone()
        } else {
            current.source.clone()
        };

        let regen = map_changed || delta.touches_hidden_regions();
        let image = if regen {
            self.render(&next).unwrap_or(None)
        } else {
            None
        };
        next.content = match (&image, regen) {
            (Some(_), _) => PublicContent::PendingBinary,
            (None, true) => PublicContent::Absent,
            (None, false) => current.content,
        };

        log::info!(
            "edit accepted map_changed={map_changed} regen={regen} marker={:?} regions={}",
            next.content,
            next.hidden_regions().len()
        );
        let snapshot = next.public_snapshot();
        self.state = Some(next);
        Ok(Outbound { snapshot, image })
    }

    fn is_current_map(&self, current: &SessionState, reference: &str) -> bool {
        let Some(source) = current.source.as_deref() else {
            return false;
        };
        if source == reference {
            return true;
        }
        match (
            self.catalog.source_path(source),
            self.catalog.source_path(reference),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Seed a newly joined connection. Always regenerates when a map is
    /// loaded; the stored marker is left alone.
    pub fn join(&mut self) -> JoinPayload {
        let state = self.activate().clone();
        let image = self.render(&state).unwrap_or(None);
        let content = if image.is_some() {
            PublicContent::PendingBinary
        } else {
            PublicContent::Absent
        };
        JoinPayload {
            snapshot: state.public_snapshot_with(content),
            image,
            tokens: self.tokens.tokens().to_vec(),
        }
    }

    /// Replace state and tokens wholesale with a saved session.
    ///
    /// The saved map must still exist; otherwise nothing changes.
    pub fn adopt(&mut self, saved: SavedSession) -> Result<Outbound, SessionError> {
        let SavedSession { mut state, tokens } = saved;
        if let Some(source) = state.source.as_deref() {
            if !self.catalog.is_available(source) {
                log::warn!("load rejected reason=unavailable-map map={source}");
                return Err(SessionError::SourceUnavailable(source.to_string()));
            }
        }
        self.effects.fill_defaults(&mut state.effect_params);

        let image = self.render(&state).unwrap_or(None);
        state.content = if image.is_some() {
            PublicContent::PendingBinary
        } else {
            PublicContent::Absent
        };

        log::info!(
            "session adopted map={:?} tokens={}",
            state.source,
            tokens.len()
        );
        let snapshot = state.public_snapshot();
        self.state = Some(state);
        self.tokens.replace(tokens);
        Ok(Outbound { snapshot, image })
    }

    /// Read-only copy for persistence.
    pub fn saved_session(&self) -> Option<SavedSession> {
        self.state.as_ref().map(|state| SavedSession {
            state: state.clone(),
            tokens: self.tokens.tokens().to_vec(),
        })
    }

    /// Apply a token command and return the full collection.
    pub fn mutate_token(&mut self, command: TokenCommand) -> Result<Vec<Token>, TokenError> {
        let op = command.name();
        self.tokens.apply(command).map_err(|e| {
            log::warn!("token {op} rejected error={e}");
            e
        })?;
        Ok(self.tokens.tokens().to_vec())
    }
}
