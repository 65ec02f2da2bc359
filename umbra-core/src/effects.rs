//! Visual effect catalog and per-effect parameter defaults.
//!
//! Every known effect always has an entry in a session's
//! `effect_params`, even when it is not the active one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Sentinel id for "no effect selected".
pub const NO_EFFECT: &str = "none";

/// Parameter keys that belong to the text overlay and are never stored
/// with an effect.
pub const TEXT_ONLY_PARAMS: [&str; 4] = [
    "backgroundImageFilename",
    "defaultFontFamily",
    "defaultTextSpeed",
    "fontSize",
];

/// A numeric or enumerable effect parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// Effect id → parameter name → value.
pub type EffectParams = BTreeMap<String, BTreeMap<String, ParamValue>>;

/// Metadata for one effect, as supplied by configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Parameter defaults.
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl EffectDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// The set of effects known to this process.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectCatalog {
    effects: BTreeMap<String, EffectDefinition>,
}

impl EffectCatalog {
    /// Build a catalog. The `"none"` effect is always present.
    pub fn new(definitions: impl IntoIterator<Item = EffectDefinition>) -> Self {
        let mut effects = BTreeMap::new();
        for mut def in definitions {
            for key in TEXT_ONLY_PARAMS {
                def.params.remove(key);
            }
            if effects.contains_key(&def.id) {
                log::warn!("Duplicate effect definition '{}' ignored", def.id);
                continue;
            }
            effects.insert(def.id.clone(), def);
        }
        effects
            .entry(NO_EFFECT.to_string())
            .or_insert_with(|| EffectDefinition::new(NO_EFFECT, "None"));
        Self { effects }
    }

    /// Catalog with only the `"none"` effect.
    pub fn builtin() -> Self {
        Self::new(std::iter::empty())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.effects.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.effects.keys().map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Option<&EffectDefinition> {
        self.effects.get(id)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Effect selected in a fresh session.
    pub fn default_effect(&self) -> String {
        NO_EFFECT.to_string()
    }

    /// Default parameters for every known effect.
    pub fn defaults(&self) -> EffectParams {
        self.effects
            .iter()
            .map(|(id, def)| (id.clone(), def.params.clone()))
            .collect()
    }

    /// Insert every missing effect and missing parameter. Existing values
    /// are left untouched; text-only keys are stripped.
    pub fn fill_defaults(&self, params: &mut EffectParams) {
        for (id, def) in &self.effects {
            let entry = params.entry(id.clone()).or_default();
            for (key, value) in &def.params {
                entry.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        for entry in params.values_mut() {
            for key in TEXT_ONLY_PARAMS {
                entry.remove(key);
            }
        }
    }
}

impl Default for EffectCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
