//! Schema-aware merge of a [`StateDelta`] onto a [`SessionState`].
//!
//! Three levels deep at most (top-level, per-effect, per-parameter).
//! The map directive is never read here: switching or clearing the map
//! is the store's job, and the private source cannot change through a
//! merge.

use crate::delta::{StateDelta, ViewDelta};
use crate::effects::EffectParams;
use crate::{SessionState, ViewTransform};

/// Apply `delta` to a copy of `base`. Neither input is modified.
pub fn merge(base: &SessionState, delta: &StateDelta) -> SessionState {
    let mut merged = base.clone();

    if let Some(effect) = &delta.active_effect {
        merged.active_effect = effect.clone();
    }
    if let Some(view) = &delta.view {
        merge_view(&mut merged.view, view);
    }
    if let Some(params) = &delta.effect_params {
        merge_effect_params(&mut merged.effect_params, params);
    }
    if let Some(regions) = delta.fog.as_ref().and_then(|fog| fog.hidden_polygons.as_ref()) {
        // List replace: regions are edited client-side as one set.
        merged.fog.hidden_polygons = regions.clone();
    }

    merged
}

fn merge_view(view: &mut ViewTransform, delta: &ViewDelta) {
    if let Some(x) = delta.center_x {
        view.center_x = x;
    }
    if let Some(y) = delta.center_y {
        view.center_y = y;
    }
    if let Some(scale) = delta.scale {
        view.scale = scale;
    }
}

fn merge_effect_params(params: &mut EffectParams, delta: &EffectParams) {
    for (effect, values) in delta {
        let entry = params.entry(effect.clone()).or_default();
        for (key, value) in values {
            entry.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{FogDelta, MapDirective};
    use crate::effects::{EffectCatalog, EffectDefinition, ParamValue};
    use crate::{HiddenRegion, PublicContent};

    fn catalog() -> EffectCatalog {
        EffectCatalog::new([
            EffectDefinition::new("crt", "CRT")
                .with_param("scanlineIntensity", 0.4)
                .with_param("curvature", 2.0),
            EffectDefinition::new("fog", "Mist").with_param("density", 0.5),
        ])
    }

    fn triangle(color: &str) -> HiddenRegion {
        HiddenRegion::new(vec![(0.0, 0.0), (0.5, 0.0), (0.0, 0.5)], color)
    }

    fn base() -> SessionState {
        let mut state = SessionState::for_map("maps/keep.png", &catalog());
        state.content = PublicContent::PendingBinary;
        state.fog.hidden_polygons = vec![triangle("#000"), triangle("#111")];
        state
    }

    #[test]
    fn test_hidden_regions_replace_not_union() {
        let base = base();
        let replacement = vec![triangle("#f00")];
        let delta = StateDelta::default().with_hidden_regions(replacement.clone());

        let merged = merge(&base, &delta);
        assert_eq!(merged.fog.hidden_polygons, replacement);
        // Base is untouched.
        assert_eq!(base.fog.hidden_polygons.len(), 2);
    }

    #[test]
    fn test_empty_region_list_clears() {
        let merged = merge(&base(), &StateDelta::default().with_hidden_regions(Vec::new()));
        assert!(merged.fog.hidden_polygons.is_empty());
    }

    #[test]
    fn test_fog_without_list_keeps_regions() {
        let delta = StateDelta {
            fog: Some(FogDelta::default()),
            ..StateDelta::default()
        };
        assert_eq!(merge(&base(), &delta).fog.hidden_polygons.len(), 2);
    }

    #[test]
    fn test_source_is_immune_to_merge() {
        let base = base();
        for directive in [
            MapDirective::Reset,
            MapDirective::Switch("maps/other.png".into()),
        ] {
            let merged = merge(&base, &StateDelta::default().with_map(directive));
            assert_eq!(merged.source, base.source);
            assert_eq!(merged.content, base.content);
        }

        let smuggled =
            StateDelta::from_json(br#"{"original_map_path":"maps/evil.png","current_filter":"crt"}"#)
                .unwrap();
        let merged = merge(&base, &smuggled);
        assert_eq!(merged.source.as_deref(), Some("maps/keep.png"));
        assert_eq!(merged.active_effect, "crt");
    }

    #[test]
    fn test_view_merges_per_field() {
        let merged = merge(&base(), &StateDelta::default().with_scale(2.0));
        assert_eq!(merged.view.scale, 2.0);
        assert_eq!(merged.view.center_x, 0.5);
        assert_eq!(merged.view.center_y, 0.5);
    }

    #[test]
    fn test_effect_params_merge_per_parameter() {
        let delta = StateDelta::from_json(br#"{"filter_params":{"crt":{"curvature":3.5}}}"#).unwrap();
        let merged = merge(&base(), &delta);

        assert_eq!(merged.effect_params["crt"]["curvature"], ParamValue::Number(3.5));
        assert_eq!(
            merged.effect_params["crt"]["scanlineIntensity"],
            ParamValue::Number(0.4)
        );
    }

    #[test]
    fn test_every_effect_keeps_default_keys() {
        let catalog = catalog();
        let deltas = [
            StateDelta::from_json(br#"{"filter_params":{"crt":{"curvature":1.0}}}"#).unwrap(),
            StateDelta::from_json(br#"{"current_filter":"fog","view_state":{"center_x":0.1}}"#).unwrap(),
            StateDelta::default().with_hidden_regions(vec![triangle("#abc")]),
        ];
        for delta in &deltas {
            let merged = merge(&base(), delta);
            for id in catalog.ids() {
                let params = &merged.effect_params[id];
                for key in catalog.get(id).unwrap().params.keys() {
                    assert!(params.contains_key(key), "{id}.{key} missing");
                }
            }
        }
    }

    #[test]
    fn test_remerge_is_idempotent() {
        let delta = StateDelta::from_json(
            br##"{
                "current_filter": "crt",
                "view_state": {"scale": 1.5, "center_y": 0.25},
                "filter_params": {"crt": {"curvature": 4.0}, "new": {"k": true}},
                "fog_of_war": {"hidden_polygons": [
                    {"vertices": [{"x":0,"y":0},{"x":1,"y":0},{"x":1,"y":1}], "color": "#123"}
                ]}
            }"##,
        )
        .unwrap();
        let once = merge(&base(), &delta);
        let twice = merge(&once, &delta);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_absent_keys_preserved() {
        let base = base();
        let merged = merge(&base, &StateDelta::default());
        assert_eq!(merged, base);
    }
}
