//! Typed partial-update documents sent by the GM.
//!
//! Each top-level field of [`SessionState`](crate::SessionState) gets an
//! explicit optional slot, so the merge engine knows statically which
//! fields merge, which replace, and which are protected:
//!
//! | Field            | Semantics                                    |
//! |------------------|----------------------------------------------|
//! | `map_content_path` | map directive, never merged                |
//! | `current_filter` | scalar replace                               |
//! | `view_state`     | per-field merge                              |
//! | `filter_params`  | per-effect, per-parameter merge              |
//! | `fog_of_war`     | `hidden_polygons` replaced as a whole        |
//!
//! Unknown keys are ignored, so a delta can never smuggle in the private
//! `original_map_path`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::effects::EffectParams;
use crate::HiddenRegion;

#[derive(Error, Debug)]
pub enum DeltaError {
    #[error("Malformed delta: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Delta must be a JSON object")]
    NotAnObject,
}

/// What an edit asks to do with the current map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MapDirective {
    /// Key absent: keep whatever map is loaded.
    #[default]
    Keep,
    /// Key present and `null`: unload the map.
    Reset,
    /// Key present with a reference: switch to that map.
    Switch(String),
}

impl MapDirective {
    pub fn is_keep(&self) -> bool {
        matches!(self, MapDirective::Keep)
    }
}

mod map_directive {
    use super::MapDirective;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &MapDirective, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            MapDirective::Switch(reference) => serializer.serialize_str(reference),
            MapDirective::Keep | MapDirective::Reset => serializer.serialize_none(),
        }
    }

    // Only called when the key is present; absence falls back to `Keep`.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MapDirective, D::Error> {
        Ok(match Option::<String>::deserialize(deserializer)? {
            Some(reference) => MapDirective::Switch(reference),
            None => MapDirective::Reset,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FogDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_polygons: Option<Vec<HiddenRegion>>,
}

/// A partial update to the session state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(
        rename = "map_content_path",
        default,
        skip_serializing_if = "MapDirective::is_keep",
        with = "map_directive"
    )]
    pub map: MapDirective,
    #[serde(rename = "current_filter", default, skip_serializing_if = "Option::is_none")]
    pub active_effect: Option<String>,
    #[serde(rename = "view_state", default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewDelta>,
    #[serde(rename = "filter_params", default, skip_serializing_if = "Option::is_none")]
    pub effect_params: Option<EffectParams>,
    #[serde(rename = "fog_of_war", default, skip_serializing_if = "Option::is_none")]
    pub fog: Option<FogDelta>,
}

impl StateDelta {
    /// Parse a delta from a JSON document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, DeltaError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, DeltaError> {
        if !value.is_object() {
            return Err(DeltaError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, DeltaError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Replace the whole hidden-region list.
    pub fn with_hidden_regions(mut self, regions: Vec<HiddenRegion>) -> Self {
        self.fog = Some(FogDelta {
            hidden_polygons: Some(regions),
        });
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.view.get_or_insert_with(ViewDelta::default).scale = Some(scale);
        self
    }

    pub fn with_map(mut self, directive: MapDirective) -> Self {
        self.map = directive;
        self
    }

    /// Whether this edit replaces the hidden-region list.
    pub fn touches_hidden_regions(&self) -> bool {
        self.fog
            .as_ref()
            .is_some_and(|fog| fog.hidden_polygons.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_keep()
            && self.active_effect.is_none()
            && self.view.is_none()
            && self.effect_params.is_none()
            && self.fog.is_none()
    }
}
