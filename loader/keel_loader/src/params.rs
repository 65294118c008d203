//! Setup parameters and build-configuration derivation.

use std::collections::BTreeMap;

use keel_diagnostic::Result;
use keel_ir::Variant;

use crate::profiles::Profiles;

/// The name of the always-present base module.
pub const BASE_MODULE_NAME: &str = "keel";

/// Prefix of the internal products holding export surfaces.
pub const SHADOW_PRODUCT_PREFIX: &str = "__shadow__";

/// How stored build-graph data is used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestoreBehavior {
    /// Only restore; fail with `NotFound` when nothing is stored.
    RestoreOnly,
    /// Ignore stored data and resolve from scratch.
    ResolveOnly,
    /// Restore when compatible, re-resolving what changed.
    #[default]
    RestoreAndTrackChanges,
}

/// How per-product errors propagate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorHandlingMode {
    #[default]
    Strict,
    /// Convert product errors to warnings and disable the product.
    Relaxed,
}

/// Everything a `setup` request carries into the loader.
#[derive(Clone, Debug, Default)]
pub struct SetupParameters {
    pub top_level_profile: String,
    pub configuration_name: String,
    /// Absolute path of the root description file.
    pub project_file_path: String,
    /// Absolute build-root directory.
    pub build_root: String,
    pub search_paths: Vec<String>,
    pub plugin_paths: Vec<String>,
    pub libexec_path: String,
    pub settings_directory: String,
    /// Override map; dotted keys, optionally scoped with `projects.` or
    /// `products.` prefixes.
    pub overridden_values: BTreeMap<String, Variant>,
    pub environment: BTreeMap<String, String>,
    pub restore_behavior: RestoreBehavior,
    pub property_checking_mode: ErrorHandlingMode,
    pub product_error_mode: ErrorHandlingMode,
    pub dry_run: bool,
    pub log_elapsed_time: bool,
    pub force_probe_execution: bool,
    pub wait_lock_build_graph: bool,
    pub fallback_provider_enabled: bool,
    pub override_build_graph_data: bool,
    /// The profile store backing `top_level_profile`.
    pub profiles: Profiles,
}

impl SetupParameters {
    pub fn new(project_file_path: impl Into<String>, build_root: impl Into<String>) -> Self {
        SetupParameters {
            configuration_name: "default".to_string(),
            fallback_provider_enabled: true,
            project_file_path: project_file_path.into(),
            build_root: build_root.into(),
            ..SetupParameters::default()
        }
    }

    /// The flat build configuration: the top-level profile's keys
    /// (recursively inherited) plus `keel.configurationName`.
    pub fn build_configuration(&self) -> Result<BTreeMap<String, Variant>> {
        let mut config = if self.top_level_profile.is_empty() {
            BTreeMap::new()
        } else {
            self.profiles.flattened(&self.top_level_profile)?
        };
        let configuration_name = if self.configuration_name.is_empty() {
            "default".to_string()
        } else {
            self.configuration_name.clone()
        };
        config.insert(
            format!("{BASE_MODULE_NAME}.configurationName"),
            Variant::String(configuration_name),
        );
        config.insert(
            format!("{BASE_MODULE_NAME}.profile"),
            Variant::String(self.top_level_profile.clone()),
        );
        Ok(config)
    }

    /// The build configuration as a nested tree
    /// (`cpp.defines` → `{cpp: {defines: ...}}`).
    pub fn build_configuration_tree(&self) -> Result<Variant> {
        Ok(tree_from_flat(&self.build_configuration()?))
    }

    /// The build configuration overlaid with the unscoped override values.
    /// Overrides scoped `projects.` / `products.` stay out of the module
    /// tree; they are applied to the matching items instead.
    pub fn final_build_configuration_tree(&self) -> Result<Variant> {
        let mut flat = self.build_configuration()?;
        for (key, value) in &self.overridden_values {
            if key.starts_with("projects.") || key.starts_with("products.") {
                continue;
            }
            flat.insert(key.clone(), value.clone());
        }
        Ok(tree_from_flat(&flat))
    }

    /// Override values scoped to one item: `prefix` is `projects.<name>` or
    /// `products.<name>`; returned keys have the scope stripped.
    pub fn overrides_for(&self, prefix: &str) -> BTreeMap<String, Variant> {
        let full_prefix = format!("{prefix}.");
        self.overridden_values
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&full_prefix)
                    .map(|rest| (rest.to_string(), value.clone()))
            })
            .collect()
    }
}

/// Builds a nested map from dotted keys.
pub(crate) fn tree_from_flat(flat: &BTreeMap<String, Variant>) -> Variant {
    let mut root: BTreeMap<String, Variant> = BTreeMap::new();
    for (key, value) in flat {
        insert_dotted(&mut root, key, value.clone());
    }
    Variant::Map(root)
}

fn insert_dotted(map: &mut BTreeMap<String, Variant>, key: &str, value: Variant) {
    match key.split_once('.') {
        None => {
            map.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Variant::Map(BTreeMap::new()));
            if !matches!(entry, Variant::Map(_)) {
                *entry = Variant::Map(BTreeMap::new());
            }
            if let Variant::Map(inner) = entry {
                insert_dotted(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn build_configuration_includes_configuration_name() {
        let params = SetupParameters::new("/p/project.keel", "/b");
        let config = params.build_configuration().unwrap();
        assert_eq!(
            config.get("keel.configurationName"),
            Some(&Variant::string("default"))
        );
    }

    #[test]
    fn final_tree_overlays_unscoped_overrides() {
        let mut params = SetupParameters::new("/p/project.keel", "/b");
        params
            .overridden_values
            .insert("cpp.optimization".to_string(), Variant::string("small"));
        params
            .overridden_values
            .insert("products.app.version".to_string(), Variant::string("9"));
        let tree = params.final_build_configuration_tree().unwrap();
        assert_eq!(
            tree.map_value("cpp").map_value("optimization"),
            Variant::string("small")
        );
        assert_eq!(tree.map_value("products"), Variant::Undefined);
        assert_eq!(
            params.overrides_for("products.app"),
            [("version".to_string(), Variant::string("9"))]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn tree_from_flat_nests_keys() {
        let flat: BTreeMap<String, Variant> = [
            ("cpp.defines".to_string(), Variant::string_list(["A"])),
            ("cpp.debug".to_string(), Variant::Bool(true)),
            ("keel.profile".to_string(), Variant::string("p")),
        ]
        .into_iter()
        .collect();
        let tree = tree_from_flat(&flat);
        assert_eq!(
            tree.map_value("cpp").map_value("defines"),
            Variant::string_list(["A"])
        );
        assert_eq!(tree.map_value("cpp").map_value("debug"), Variant::Bool(true));
    }
}
