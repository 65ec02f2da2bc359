//! # umbra-core
//!
//! Session data model for the shared fog-of-war scene.
//!
//! ```text
//!  SessionState (authoritative, GM-only writer)
//!       │
//!       ├── source          private map locator, never sent to viewers
//!       ├── content         public marker: null | "binary://"
//!       ├── view            normalized viewport
//!       ├── effect_params   effect id → parameter → value
//!       └── fog             ordered hidden regions
//!
//!  TokenBoard (independent of the fog pipeline)
//! ```
//!
//! Field names on the wire follow the browser clients (`original_map_path`,
//! `map_content_path`, `view_state`, `filter_params`, `fog_of_war`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod delta;
pub mod effects;
pub mod merge;
pub mod tokens;

pub use delta::{DeltaError, FogDelta, MapDirective, StateDelta, ViewDelta};
pub use effects::{EffectCatalog, EffectDefinition, EffectParams, ParamValue, NO_EFFECT};
pub use merge::merge;
pub use tokens::{Token, TokenBoard, TokenCommand, TokenError};

/// Marker value telling a viewer that the redacted image arrives out of band.
pub const BINARY_MARKER: &str = "binary://";

/// Public content marker carried in every snapshot.
///
/// Never holds a path: either the image is absent or it follows as a
/// separate binary frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PublicContent {
    #[default]
    Absent,
    PendingBinary,
}

impl PublicContent {
    pub fn is_pending(&self) -> bool {
        matches!(self, PublicContent::PendingBinary)
    }
}

impl Serialize for PublicContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PublicContent::Absent => serializer.serialize_none(),
            PublicContent::PendingBinary => serializer.serialize_str(BINARY_MARKER),
        }
    }
}

impl<'de> Deserialize<'de> for PublicContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Anything other than the sentinel (e.g. a raw path) reads as absent.
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref() {
            Some(BINARY_MARKER) => PublicContent::PendingBinary,
            _ => PublicContent::Absent,
        })
    }
}

/// Normalized viewport, independent of redaction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    pub center_x: f64,
    pub center_y: f64,
    pub scale: f64,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            center_x: 0.5,
            center_y: 0.5,
            scale: 1.0,
        }
    }
}

/// A single polygon vertex as received from the GM.
///
/// Storage keeps whatever arrived; only the compositor decides whether a
/// vertex is usable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionVertex {
    Point { x: f64, y: f64 },
    Malformed(serde_json::Value),
}

impl RegionVertex {
    pub fn point(x: f64, y: f64) -> Self {
        RegionVertex::Point { x, y }
    }

    /// Normalized coordinates, or `None` for anything non-numeric.
    pub fn coords(&self) -> Option<(f64, f64)> {
        match *self {
            RegionVertex::Point { x, y } if x.is_finite() && y.is_finite() => Some((x, y)),
            _ => None,
        }
    }
}

/// The `vertices` field as received. Anything other than a list is kept
/// verbatim and never drawn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionVertices {
    List(Vec<RegionVertex>),
    Malformed(serde_json::Value),
}

impl Default for RegionVertices {
    fn default() -> Self {
        RegionVertices::List(Vec::new())
    }
}

impl RegionVertices {
    pub fn as_list(&self) -> Option<&[RegionVertex]> {
        match self {
            RegionVertices::List(list) => Some(list),
            RegionVertices::Malformed(_) => None,
        }
    }

    /// Number of listed vertices; 0 when malformed.
    pub fn len(&self) -> usize {
        self.as_list().map_or(0, <[RegionVertex]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<RegionVertex>> for RegionVertices {
    fn from(list: Vec<RegionVertex>) -> Self {
        RegionVertices::List(list)
    }
}

/// An operator-defined hidden region ("fog" polygon).
///
/// Stored exactly as the GM sent it, unknown keys included; whether it
/// can be drawn is decided at composite time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HiddenRegion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub vertices: RegionVertices,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl HiddenRegion {
    pub fn new(vertices: Vec<(f64, f64)>, color: impl Into<String>) -> Self {
        Self {
            id: None,
            vertices: RegionVertices::List(
                vertices
                    .into_iter()
                    .map(|(x, y)| RegionVertex::point(x, y))
                    .collect(),
            ),
            color: Some(serde_json::Value::String(color.into())),
            extra: serde_json::Map::new(),
        }
    }

    /// The colour when it is a string; any other JSON value reads as none.
    pub fn color_str(&self) -> Option<&str> {
        self.color.as_ref().and_then(serde_json::Value::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FogOfWar {
    #[serde(default)]
    pub hidden_polygons: Vec<HiddenRegion>,
}

/// The single authoritative session document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Private locator of the unredacted map. Persisted, never broadcast.
    #[serde(rename = "original_map_path", default)]
    pub source: Option<String>,
    /// Marker last broadcast for this state.
    #[serde(rename = "map_content_path", default)]
    pub content: PublicContent,
    #[serde(rename = "current_filter", default = "default_effect_id")]
    pub active_effect: String,
    #[serde(rename = "view_state", default)]
    pub view: ViewTransform,
    #[serde(rename = "filter_params", default)]
    pub effect_params: EffectParams,
    #[serde(rename = "fog_of_war", default)]
    pub fog: FogOfWar,
}

fn default_effect_id() -> String {
    NO_EFFECT.to_string()
}

impl SessionState {
    /// The generic "no map loaded" document.
    pub fn blank(catalog: &EffectCatalog) -> Self {
        Self {
            source: None,
            content: PublicContent::Absent,
            active_effect: catalog.default_effect(),
            view: ViewTransform::default(),
            effect_params: catalog.defaults(),
            fog: FogOfWar::default(),
        }
    }

    /// A fresh default document for a newly selected map.
    pub fn for_map(source: impl Into<String>, catalog: &EffectCatalog) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::blank(catalog)
        }
    }

    pub fn hidden_regions(&self) -> &[HiddenRegion] {
        &self.fog.hidden_polygons
    }

    /// Viewer-safe copy carrying the stored marker.
    pub fn public_snapshot(&self) -> PublicSnapshot {
        self.public_snapshot_with(self.content)
    }

    /// Viewer-safe copy carrying an explicit marker.
    pub fn public_snapshot_with(&self, content: PublicContent) -> PublicSnapshot {
        PublicSnapshot {
            content,
            active_effect: self.active_effect.clone(),
            view: self.view,
            effect_params: self.effect_params.clone(),
            fog: self.fog.clone(),
        }
    }
}

/// What viewers receive. Has no private-source field at all.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublicSnapshot {
    #[serde(rename = "map_content_path", default)]
    pub content: PublicContent,
    #[serde(rename = "current_filter")]
    pub active_effect: String,
    #[serde(rename = "view_state")]
    pub view: ViewTransform,
    #[serde(rename = "filter_params")]
    pub effect_params: EffectParams,
    #[serde(rename = "fog_of_war")]
    pub fog: FogOfWar,
}

/// State + tokens exchanged with the save/load collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    pub state: SessionState,
    #[serde(default)]
    pub tokens: Vec<Token>,
}
