//! The resolved build model.
//!
//! Everything here is plain data: the output of resolution, owned by the
//! top-level project and serializable into the persistent build graph.
//! Cross-product references use unique names, not indices, so the model
//! stays stable under serialization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use keel_ir::{CodeLocation, FileTags, Variant};
use keel_loader::{ProbeRecord, StoredModuleProviderInfo};

/// A script kept as source, evaluated per invocation at build time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptFunction {
    pub source_code: String,
    pub location: CodeLocation,
}

impl ScriptFunction {
    pub fn is_valid(&self) -> bool {
        !self.source_code.is_empty()
    }
}

/// One resolved module of a product.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedModule {
    pub name: String,
    /// True when the "module" is another product's export surface.
    pub is_product_dependency: bool,
    /// Names of modules this module depends on.
    pub module_dependencies: Vec<String>,
    pub setup_build_environment_script: Option<ScriptFunction>,
    pub setup_run_environment_script: Option<ScriptFunction>,
}

/// A source file of a product.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceArtifact {
    pub absolute_file_path: String,
    pub file_tags: FileTags,
    pub override_file_tags: bool,
    pub target_of_module: String,
    /// The module property map in effect for this artifact.
    pub properties: BTreeMap<String, Variant>,
}

/// Wildcard expansion attached to a group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceWildcards {
    pub patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub files: Vec<SourceArtifact>,
}

/// A subset of a product's files with its own property overrides.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedGroup {
    pub name: String,
    pub enabled: bool,
    pub location: CodeLocation,
    pub prefix: String,
    pub files: Vec<SourceArtifact>,
    pub wildcards: Option<SourceWildcards>,
    pub file_tags: FileTags,
    pub override_tags: bool,
    /// Module property map for artifacts in this group.
    pub properties: BTreeMap<String, Variant>,
    pub target_of_module: String,
}

impl ResolvedGroup {
    pub fn all_files(&self) -> impl Iterator<Item = &SourceArtifact> {
        self.files
            .iter()
            .chain(self.wildcards.iter().flat_map(|w| w.files.iter()))
    }
}

/// A nested `module.property: value` binding of a rule artifact.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleArtifactBinding {
    pub name: Vec<String>,
    pub code: String,
    pub location: CodeLocation,
}

/// An `Artifact` child of a rule. `file_path` stays raw source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleArtifact {
    pub file_path: String,
    pub file_tags: FileTags,
    pub always_updated: bool,
    pub location: CodeLocation,
    pub file_path_location: CodeLocation,
    pub bindings: Vec<RuleArtifactBinding>,
}

/// A resolved transformation rule.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub module_name: String,
    pub prepare_script: ScriptFunction,
    pub output_artifacts_script: ScriptFunction,
    pub output_file_tags: FileTags,
    pub inputs: FileTags,
    pub inputs_from_dependencies: FileTags,
    pub auxiliary_inputs: FileTags,
    pub excluded_inputs: FileTags,
    pub explicitly_depends_on: FileTags,
    pub explicitly_depends_on_from_dependencies: FileTags,
    pub multiplex: bool,
    pub requires_inputs: bool,
    pub always_run: bool,
    pub artifacts: Vec<RuleArtifact>,
}

impl Rule {
    pub fn declares_inputs(&self) -> bool {
        !self.inputs.is_empty() || !self.inputs_from_dependencies.is_empty()
    }
}

/// Maps filename patterns to file tags, with priority.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileTagger {
    pub patterns: Vec<String>,
    pub file_tags: FileTags,
    pub priority: i64,
}

/// A resolved dependency scanner.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedScanner {
    pub module_name: String,
    pub inputs: FileTags,
    pub recursive: bool,
    pub search_paths_script: ScriptFunction,
    pub scan_script: ScriptFunction,
}

/// Job-pool concurrency limits. Merging keeps the smaller limit unless a
/// pool is unset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLimits {
    limits: BTreeMap<String, i64>,
}

impl JobLimits {
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn get_limit(&self, pool: &str) -> Option<i64> {
        self.limits.get(pool).copied()
    }

    pub fn set_limit(&mut self, pool: impl Into<String>, limit: i64) {
        self.limits.insert(pool.into(), limit);
    }

    /// Sets the limit only if it is stricter than the current one.
    pub fn set_stricter_limit(&mut self, pool: &str, limit: i64) {
        match self.get_limit(pool) {
            Some(existing) if existing <= limit => {}
            _ => self.set_limit(pool, limit),
        }
    }

    /// Fills pools this map does not set yet from `other`.
    pub fn fill_from(&mut self, other: &JobLimits) {
        for (pool, limit) in &other.limits {
            self.limits.entry(pool.clone()).or_insert(*limit);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.limits.iter()
    }
}

/// Group override attached by `fileTagsFilter` (exclusive with `files`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactProperties {
    pub file_tags_filter: FileTags,
    pub property_map: BTreeMap<String, Variant>,
    pub extra_file_tags: FileTags,
}

/// One exported property of an `Export` item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedProperty {
    pub full_name: String,
    pub source_code: String,
    pub is_builtin: bool,
}

/// A child item of an exported module surface.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportedItem {
    pub name: String,
    pub properties: Vec<ExportedProperty>,
    pub children: Vec<ExportedItem>,
}

/// A module the exported surface itself depends on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportedModuleDependency {
    pub name: String,
    pub module_properties: BTreeMap<String, Variant>,
}

/// What consumers of a product see: its exported module surface.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportedModule {
    pub properties: Vec<ExportedProperty>,
    pub property_values: BTreeMap<String, Variant>,
    pub module_property_values: BTreeMap<String, Variant>,
    pub children: Vec<ExportedItem>,
    pub import_statements: Vec<String>,
    pub module_dependencies: Vec<ExportedModuleDependency>,
    pub product_dependencies: Vec<String>,
    pub dependency_parameters: BTreeMap<String, Variant>,
}

/// The resolved form of one product.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedProduct {
    pub name: String,
    pub target_name: String,
    pub multiplex_configuration_id: String,
    pub enabled: bool,
    pub location: CodeLocation,
    pub build_directory: String,
    pub source_directory: String,
    pub destination_directory: String,
    /// The product type: file tags the product's target artifacts carry.
    pub file_tags: FileTags,
    pub product_properties: BTreeMap<String, Variant>,
    /// Module name -> evaluated property map.
    pub module_properties: BTreeMap<String, Variant>,
    pub modules: Vec<ResolvedModule>,
    /// Dependency parameters per module name.
    pub module_parameters: BTreeMap<String, Variant>,
    pub groups: Vec<ResolvedGroup>,
    pub rules: Vec<Rule>,
    pub file_taggers: Vec<FileTagger>,
    pub scanners: Vec<ResolvedScanner>,
    pub job_limits: JobLimits,
    pub artifact_properties: Vec<ArtifactProperties>,
    pub exported_module: ExportedModule,
    pub probes: Vec<ProbeRecord>,
    /// Unique names of products this one depends on, sorted by display
    /// name.
    pub dependencies: Vec<String>,
    pub dependency_parameters: BTreeMap<String, Variant>,
    pub missing_source_files: Vec<String>,
}

impl ResolvedProduct {
    /// The product's identifier including the multiplex axis.
    pub fn unique_name(&self) -> String {
        if self.multiplex_configuration_id.is_empty() {
            self.name.clone()
        } else {
            format!("{}@{}", self.name, self.multiplex_configuration_id)
        }
    }

    pub fn full_display_name(&self) -> String {
        self.unique_name()
    }

    /// All source artifacts, in all groups, wildcard-expanded included.
    pub fn all_files(&self) -> Vec<&SourceArtifact> {
        self.groups.iter().flat_map(ResolvedGroup::all_files).collect()
    }

    /// Source artifacts of enabled groups only.
    pub fn all_enabled_files(&self) -> Vec<&SourceArtifact> {
        self.groups
            .iter()
            .filter(|g| g.enabled)
            .flat_map(ResolvedGroup::all_files)
            .collect()
    }

    /// The value of a base-module property, e.g. `install`.
    pub fn base_module_property(&self, name: &str) -> Variant {
        self.module_properties
            .get(keel_loader::BASE_MODULE_NAME)
            .map_or(Variant::Undefined, |map| map.map_value(name))
    }

    /// Tags for a file name, from the taggers (already priority-sorted).
    pub fn file_tags_for_file_name(&self, file_name: &str) -> FileTags {
        let mut result = FileTags::new();
        let mut best_priority = i64::MIN;
        for tagger in &self.file_taggers {
            if tagger.priority < best_priority && !result.is_empty() {
                break;
            }
            for pattern in &tagger.patterns {
                if keel_ir::fileinfo::matches_pattern(pattern, file_name) {
                    best_priority = tagger.priority;
                    result.unite(&tagger.file_tags);
                    break;
                }
            }
        }
        result
    }
}

/// A project node of the resolved tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedProject {
    pub name: String,
    pub location: CodeLocation,
    pub enabled: bool,
    pub project_properties: BTreeMap<String, Variant>,
    pub products: Vec<ResolvedProduct>,
    pub sub_projects: Vec<ResolvedProject>,
}

impl ResolvedProject {
    /// All products of this project and its sub-projects.
    pub fn all_products(&self) -> Vec<&ResolvedProduct> {
        let mut result: Vec<&ResolvedProduct> = self.products.iter().collect();
        for sub in &self.sub_projects {
            result.extend(sub.all_products());
        }
        result
    }

    pub fn for_each_product_mut(&mut self, f: &mut impl FnMut(&mut ResolvedProduct)) {
        for product in &mut self.products {
            f(product);
        }
        for sub in &mut self.sub_projects {
            sub.for_each_product_mut(f);
        }
    }
}

/// The root of the resolved model, together with everything the build
/// graph persists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopLevelProject {
    pub project: ResolvedProject,
    pub build_directory: String,
    pub build_configuration: Variant,
    pub overridden_values: BTreeMap<String, Variant>,
    pub build_system_files: Vec<String>,
    pub profile_configs: Variant,
    /// Project-level stored probes, keyed by global id on restore.
    pub probes: Vec<ProbeRecord>,
    pub module_provider_info: StoredModuleProviderInfo,
    pub canonical_file_path_results: BTreeMap<String, String>,
    pub file_exists_results: BTreeMap<String, bool>,
    pub directory_entries_results: BTreeMap<String, Vec<String>>,
    pub file_last_modified_results: BTreeMap<String, u64>,
    pub environment: BTreeMap<String, String>,
    pub last_resolve_time: u64,
}

impl TopLevelProject {
    pub fn all_products(&self) -> Vec<&ResolvedProduct> {
        self.project.all_products()
    }

    /// Product-level stored probes, keyed by unique product name.
    pub fn product_probes(&self) -> BTreeMap<String, Vec<ProbeRecord>> {
        let mut result = BTreeMap::new();
        for product in self.all_products() {
            if !product.probes.is_empty() {
                result.insert(product.unique_name(), product.probes.clone());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unique_name_includes_multiplex_id() {
        let mut product = ResolvedProduct {
            name: "app".to_string(),
            ..ResolvedProduct::default()
        };
        assert_eq!(product.unique_name(), "app");
        product.multiplex_configuration_id = "armv8".to_string();
        assert_eq!(product.unique_name(), "app@armv8");
    }

    #[test]
    fn job_limits_merge_semantics() {
        let mut limits = JobLimits::default();
        limits.set_limit("linker", 4);
        limits.set_stricter_limit("linker", 8);
        assert_eq!(limits.get_limit("linker"), Some(4));
        limits.set_stricter_limit("linker", 2);
        assert_eq!(limits.get_limit("linker"), Some(2));

        let mut outer = JobLimits::default();
        outer.set_limit("linker", 16);
        outer.set_limit("compiler", 8);
        limits.fill_from(&outer);
        assert_eq!(limits.get_limit("linker"), Some(2));
        assert_eq!(limits.get_limit("compiler"), Some(8));
    }

    #[test]
    fn file_tagger_priority_order() {
        let product = ResolvedProduct {
            file_taggers: vec![
                FileTagger {
                    patterns: vec!["*.c".to_string()],
                    file_tags: FileTags::from_string_list(["c-high"]),
                    priority: 5,
                },
                FileTagger {
                    patterns: vec!["*.c".to_string()],
                    file_tags: FileTags::from_string_list(["c-low"]),
                    priority: 0,
                },
            ],
            ..ResolvedProduct::default()
        };
        let tags = product.file_tags_for_file_name("main.c");
        assert_eq!(tags.to_string_list(), vec!["c-high"]);
    }

    #[test]
    fn all_products_walks_subprojects() {
        let project = ResolvedProject {
            products: vec![ResolvedProduct {
                name: "a".to_string(),
                ..ResolvedProduct::default()
            }],
            sub_projects: vec![ResolvedProject {
                products: vec![ResolvedProduct {
                    name: "b".to_string(),
                    ..ResolvedProduct::default()
                }],
                ..ResolvedProject::default()
            }],
            ..ResolvedProject::default()
        };
        let names: Vec<&str> = project.all_products().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
