//! Map catalog: which maps exist and what state a freshly loaded map
//! starts with.
//!
//! The session store only asks the catalog questions; uploading, listing
//! and saving map configs live elsewhere. [`DirectoryCatalog`] answers
//! them from a maps directory plus an optional per-map config directory:
//!
//! ```text
//! maps/
//!   Help.png
//!   cave.webp
//! configs/
//!   cave.webp_config.json       ← preferred
//!   cave.webp_config.json.bak   ← fallback when the main file is unreadable
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use thiserror::Error;
use umbra_core::{EffectCatalog, SessionState};

/// Accepted map image extensions (case-insensitive).
pub const MAP_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Map loaded when a session starts without one, if present.
pub const DEFAULT_MAP: &str = "Help.png";

/// Prefix of every source reference the catalog hands out.
pub const SOURCE_PREFIX: &str = "maps/";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Invalid map reference '{0}'")]
    InvalidReference(String),
    #[error("Unsupported map format '{0}'")]
    UnsupportedFormat(String),
    #[error("Map not found: {0}")]
    NotFound(String),
}

/// What the session pipeline needs to know about maps.
pub trait MapCatalog: Send + Sync {
    /// Does the referenced map exist with an accepted image format?
    fn is_available(&self, reference: &str) -> bool;

    /// Filesystem path of the referenced map's pixels.
    fn source_path(&self, reference: &str) -> Option<PathBuf>;

    /// A fresh document for the referenced map (saved per-map settings if
    /// any, defaults otherwise). `source` is always set.
    fn state_for_map(
        &self,
        reference: &str,
        effects: &EffectCatalog,
    ) -> Result<SessionState, CatalogError>;

    /// Reference of the map to start new sessions with, if it exists.
    fn default_map(&self) -> Option<String>;
}

/// Reduce a reference (`maps/cave.png`, `cave.png`, `C:\x\cave.png`) to
/// its file name. Rejects empty, dot and hidden names.
pub fn map_file_name(reference: &str) -> Option<&str> {
    let name = reference
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(reference)
        .trim();
    if name.is_empty() || name.starts_with('.') {
        return None;
    }
    Some(name)
}

pub fn has_map_extension(name: &str) -> bool {
    name.rsplit_once('.').is_some_and(|(_, ext)| {
        MAP_EXTENSIONS
            .iter()
            .any(|allowed| ext.eq_ignore_ascii_case(allowed))
    })
}

/// Filesystem-backed catalog.
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    maps_dir: PathBuf,
    configs_dir: Option<PathBuf>,
    default_map: String,
}

impl DirectoryCatalog {
    pub fn new(maps_dir: impl Into<PathBuf>) -> Self {
        Self {
            maps_dir: maps_dir.into(),
            configs_dir: None,
            default_map: DEFAULT_MAP.to_string(),
        }
    }

    pub fn with_configs(mut self, configs_dir: impl Into<PathBuf>) -> Self {
        self.configs_dir = Some(configs_dir.into());
        self
    }

    pub fn with_default_map(mut self, name: impl Into<String>) -> Self {
        self.default_map = name.into();
        self
    }

    pub fn maps_dir(&self) -> &Path {
        &self.maps_dir
    }

    fn checked_name<'a>(&self, reference: &'a str) -> Result<&'a str, CatalogError> {
        let name = map_file_name(reference)
            .ok_or_else(|| CatalogError::InvalidReference(reference.to_string()))?;
        if !has_map_extension(name) {
            return Err(CatalogError::UnsupportedFormat(name.to_string()));
        }
        if !self.maps_dir.join(name).is_file() {
            return Err(CatalogError::NotFound(name.to_string()));
        }
        Ok(name)
    }

    /// Saved settings for `name`, main file first, then the backup.
    fn load_config(&self, name: &str) -> Option<Value> {
        let dir = self.configs_dir.as_ref()?;
        let main = dir.join(format!("{name}_config.json"));
        let backup = dir.join(format!("{name}_config.json.bak"));

        for path in [&main, &backup] {
            if !path.exists() {
                continue;
            }
            match fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string()))
            {
                Ok(value) if value.is_object() => {
                    log::info!("Loaded map config {}", path.display());
                    return Some(value);
                }
                Ok(_) => log::error!("Map config {} is not an object", path.display()),
                Err(e) => log::error!("Failed to read map config {}: {e}", path.display()),
            }
        }
        None
    }
}

/// Repair the sections a hand-edited or legacy config may get wrong.
fn normalize_config(mut config: Value) -> Value {
    if let Some(obj) = config.as_object_mut() {
        if !obj.get("view_state").is_some_and(Value::is_object) {
            obj.insert(
                "view_state".into(),
                json!({"center_x": 0.5, "center_y": 0.5, "scale": 1.0}),
            );
        }
        let fog_ok = obj
            .get("fog_of_war")
            .and_then(|fog| fog.get("hidden_polygons"))
            .is_some_and(Value::is_array);
        if !fog_ok {
            obj.insert("fog_of_war".into(), json!({"hidden_polygons": []}));
        }
        if !obj.get("filter_params").is_some_and(Value::is_object) {
            obj.remove("filter_params");
        }
        // The stored content path is a legacy raw path; markers are
        // recomputed when the map is shown.
        obj.remove("map_content_path");
        obj.remove("map_image_path");
    }
    config
}

impl MapCatalog for DirectoryCatalog {
    fn is_available(&self, reference: &str) -> bool {
        self.checked_name(reference).is_ok()
    }

    fn source_path(&self, reference: &str) -> Option<PathBuf> {
        map_file_name(reference).map(|name| self.maps_dir.join(name))
    }

    fn state_for_map(
        &self,
        reference: &str,
        effects: &EffectCatalog,
    ) -> Result<SessionState, CatalogError> {
        let name = self.checked_name(reference)?;
        let source = format!("{SOURCE_PREFIX}{name}");

        let loaded = self.load_config(name).and_then(|config| {
            serde_json::from_value::<SessionState>(normalize_config(config))
                .map_err(|e| log::error!("Map config for {name} has an invalid shape: {e}"))
                .ok()
        });

        let mut state = match loaded {
            Some(state) => state,
            None => {
                log::info!("Generating default state for {name}");
                SessionState::for_map(source.clone(), effects)
            }
        };
        effects.fill_defaults(&mut state.effect_params);
        state.source = Some(source);
        state.content = Default::default();
        Ok(state)
    }

    fn default_map(&self) -> Option<String> {
        self.is_available(&self.default_map)
            .then(|| format!("{SOURCE_PREFIX}{}", self.default_map))
    }
}
