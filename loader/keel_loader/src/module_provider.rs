//! Module providers: synthesizing module search paths on demand.
//!
//! When a module cannot be found on any search path, providers get a
//! chance to generate one. Providers are themselves declarative items; an
//! instance is synthesized into a transient file, its probes run, and its
//! `searchPaths` pushed onto the reader's extra-search-path stack.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;

use serde::{Deserialize, Serialize};
use tracing::debug;

use keel_diagnostic::{ErrorInfo, Result};
use keel_ir::{CodeLocation, Item, ItemType, QualifiedId, Value, Variant};

use crate::evaluator::Evaluator;
use crate::item_reader::ItemReader;
use crate::module_loader::ProductContext;
use crate::params::SetupParameters;
use crate::probes::ProbesResolver;

/// How a provider file was looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModuleProviderLookup {
    /// `module-providers/<name>.keel`; a miss is fatal.
    Named,
    /// `module-providers/<name components>/provider.keel`; misses fall
    /// through.
    Scoped,
    /// `module-providers/__fallback/provider.keel`.
    Fallback,
}

/// Cache key: provider name, configuration and lookup shape.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderCacheKey {
    pub name: String,
    pub config_hash: String,
    pub lookup: ModuleProviderLookup,
}

/// One provider run, persisted for reuse on the next resolve.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleProviderInfo {
    pub name: String,
    pub config: Variant,
    pub provider_file: String,
    pub search_paths: Vec<String>,
    /// Output produced during a dry run; not reusable across builds.
    pub transient_output: bool,
}

/// The provider cache as stored in the build graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredModuleProviderInfo {
    pub providers: BTreeMap<ProviderCacheKey, ModuleProviderInfo>,
}

/// Outcome of a provider lookup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModuleProviderResult {
    pub provider_found: bool,
    pub provider_added_search_paths: bool,
}

struct Provider {
    name: QualifiedId,
    lookup: ModuleProviderLookup,
}

/// Runs module providers and manages their cache.
pub struct ModuleProviderLoader<'a> {
    params: &'a SetupParameters,
    reader: &'a ItemReader,
    evaluator: &'a Evaluator,
    probes_resolver: &'a ProbesResolver<'a>,
    stored: RefCell<StoredModuleProviderInfo>,
    /// Transient instance files; deleted when the loader drops.
    temp_files: RefCell<Vec<tempfile::TempPath>>,
}

impl<'a> ModuleProviderLoader<'a> {
    pub fn new(
        params: &'a SetupParameters,
        reader: &'a ItemReader,
        evaluator: &'a Evaluator,
        probes_resolver: &'a ProbesResolver<'a>,
    ) -> Self {
        ModuleProviderLoader {
            params,
            reader,
            evaluator,
            probes_resolver,
            stored: RefCell::new(StoredModuleProviderInfo::default()),
            temp_files: RefCell::new(Vec::new()),
        }
    }

    pub fn set_stored_module_provider_info(&self, info: StoredModuleProviderInfo) {
        *self.stored.borrow_mut() = info;
    }

    pub fn stored_module_provider_info(&self) -> StoredModuleProviderInfo {
        self.stored.borrow().clone()
    }

    /// Tries to materialize search paths for a missing module.
    pub fn execute_module_provider(
        &self,
        product: &ProductContext,
        depends_location: &CodeLocation,
        module_name: &QualifiedId,
        fallback_enabled: bool,
    ) -> Result<ModuleProviderResult> {
        debug!(module = %module_name, "module not found, checking for module providers");
        let explicit_names = self.module_providers_of(product)?;
        let providers: Vec<Provider> = match &explicit_names {
            Some(names) => names
                .iter()
                .map(|name| Provider {
                    name: QualifiedId::from_string(name),
                    lookup: ModuleProviderLookup::Named,
                })
                .collect(),
            None => {
                let mut providers = Vec::new();
                let mut name = module_name.clone();
                while !name.is_empty() {
                    providers.push(Provider {
                        name: name.clone(),
                        lookup: ModuleProviderLookup::Scoped,
                    });
                    name.pop_back();
                }
                providers
            }
        };
        let mut result = self.find_module_provider(&providers, product, depends_location)?;
        if fallback_enabled && !result.provider_found && explicit_names.is_none() {
            debug!(module = %module_name, "specific provider not found, trying fallback");
            result = self.find_module_provider(
                &[Provider {
                    name: module_name.clone(),
                    lookup: ModuleProviderLookup::Fallback,
                }],
                product,
                depends_location,
            )?;
        }
        Ok(result)
    }

    fn module_providers_of(&self, product: &ProductContext) -> Result<Option<Vec<String>>> {
        // The property chain walks up enclosing items.
        let pool = self.evaluator.pool();
        let mut current = Some(product.item.clone());
        while let Some(item) = current {
            if let Some(providers) = self
                .evaluator
                .optional_string_list_value(&item, "keelModuleProviders")?
            {
                return Ok(Some(providers));
            }
            current = item.parent().map(|id| pool.get(id));
        }
        Ok(None)
    }

    fn find_module_provider(
        &self,
        providers: &[Provider],
        product: &ProductContext,
        depends_location: &CodeLocation,
    ) -> Result<ModuleProviderResult> {
        if providers.is_empty() {
            return Ok(ModuleProviderResult::default());
        }
        let mut all_search_paths = Vec::new();
        let mut result = ModuleProviderResult::default();
        for provider in providers {
            let config = self
                .module_provider_config(product)?
                .get(&provider.name.to_string())
                .cloned()
                .unwrap_or(Variant::Map(BTreeMap::new()));
            let key = ProviderCacheKey {
                name: provider.name.to_string(),
                config_hash: config.config_hash(),
                lookup: provider.lookup,
            };
            let cached = self.stored.borrow().providers.get(&key).cloned();
            let info = match cached {
                Some(info) => {
                    debug!(provider = %provider.name, "re-using provider from cache");
                    info
                }
                None => {
                    let provider_file =
                        self.find_module_provider_file(&provider.name, provider.lookup);
                    let mut info = ModuleProviderInfo {
                        name: provider.name.to_string(),
                        config: config.clone(),
                        provider_file: provider_file.clone().unwrap_or_default(),
                        search_paths: Vec::new(),
                        transient_output: self.params.dry_run,
                    };
                    if let Some(provider_file) = provider_file {
                        debug!(provider = %provider.name, file = %provider_file, "running provider");
                        info.search_paths = self.provider_search_paths(
                            &provider.name,
                            &provider_file,
                            product,
                            &config,
                            depends_location,
                        )?;
                    }
                    self.stored
                        .borrow_mut()
                        .providers
                        .insert(key, info.clone());
                    info
                }
            };
            if info.provider_file.is_empty() {
                if provider.lookup == ModuleProviderLookup::Named {
                    return Err(ErrorInfo::resolve(
                        format!("Unknown provider '{}'", provider.name),
                        depends_location.clone(),
                    ));
                }
                continue;
            }
            result.provider_found = true;
            if info.search_paths.is_empty() {
                debug!("module provider did run, but did not set up any modules");
                continue;
            }
            debug!(
                count = info.search_paths.len(),
                "module provider added search paths"
            );
            all_search_paths.extend(info.search_paths);
        }
        if all_search_paths.is_empty() {
            return Ok(result);
        }
        self.reader.push_extra_search_paths(all_search_paths);
        result.provider_added_search_paths = true;
        Ok(result)
    }

    /// The provider configuration: the product's `moduleProviders` item
    /// tree (evaluated), overlaid with `moduleProviders.<name>.*` from the
    /// build configuration.
    fn module_provider_config(
        &self,
        product: &ProductContext,
    ) -> Result<BTreeMap<String, Variant>> {
        if let Some(config) = product.module_provider_config.borrow().as_ref() {
            return Ok(config.clone());
        }
        let pool = self.evaluator.pool();
        let mut config: BTreeMap<String, Variant> = BTreeMap::new();
        if let Some(config_item) = product.item.item_property(pool, "moduleProviders") {
            let config_item = pool.get(config_item);
            config_item.set_scope(Some(product.item.id()));
            self.collect_config(&config_item, &QualifiedId::new(), &mut config)?;
        }
        if let Variant::Map(from_build_config) =
            product.module_properties.map_value("moduleProviders")
        {
            for (provider, overrides) in from_build_config {
                let Variant::Map(overrides) = overrides else {
                    continue;
                };
                let mut merged = config.get(&provider).map_or_else(BTreeMap::new, |existing| {
                    existing.as_map().cloned().unwrap_or_default()
                });
                for (key, value) in overrides {
                    merged.insert(key, value);
                }
                config.insert(provider, Variant::Map(merged));
            }
        }
        *product.module_provider_config.borrow_mut() = Some(config.clone());
        Ok(config)
    }

    fn collect_config(
        &self,
        item: &Item,
        name: &QualifiedId,
        config: &mut BTreeMap<String, Variant>,
    ) -> Result<()> {
        let pool = self.evaluator.pool();
        for (key, value) in item.properties() {
            if let Some(nested) = value.as_item() {
                let nested_item = pool.get(nested);
                nested_item.set_scope(item.scope());
                self.collect_config(&nested_item, &name.appended(key), config)?;
                continue;
            }
            let (variant, _) = self.evaluator.evaluate_value(item, &key, &value)?;
            let provider_name = name.to_string();
            let mut map = config
                .get(&provider_name)
                .and_then(Variant::as_map)
                .cloned()
                .unwrap_or_default();
            map.insert(key, variant);
            config.insert(provider_name, Variant::Map(map));
        }
        Ok(())
    }

    fn find_module_provider_file(
        &self,
        name: &QualifiedId,
        lookup: ModuleProviderLookup,
    ) -> Option<String> {
        for search_path in self.reader.all_search_paths() {
            let base = format!("{search_path}/module-providers");
            let candidate = match lookup {
                ModuleProviderLookup::Named => {
                    let named = format!("{base}/{name}.keel");
                    if std::path::Path::new(&named).is_file() {
                        named
                    } else {
                        // A named provider may still live at its scoped
                        // location.
                        scoped_path(&base, name)
                    }
                }
                ModuleProviderLookup::Scoped => scoped_path(&base, name),
                ModuleProviderLookup::Fallback => format!("{base}/__fallback/provider.keel"),
            };
            if std::path::Path::new(&candidate).is_file() {
                return Some(candidate);
            }
            debug!(path = %candidate, "no module provider found");
        }
        None
    }

    /// Synthesizes the transient provider instance, runs its probes and
    /// evaluates `searchPaths`.
    fn provider_search_paths(
        &self,
        name: &QualifiedId,
        provider_file: &str,
        product: &ProductContext,
        config: &Variant,
        location: &CodeLocation,
    ) -> Result<Vec<String>> {
        let project_build_dir = product
            .project_item
            .variant_property(self.evaluator.pool(), "buildDirectory")
            .map(|v| v.value.to_display_string())
            .unwrap_or_else(|| self.params.build_root.clone());
        let base_dir_prefix = format!("{project_build_dir}/genmodules/{name}");

        let mut source = String::new();
        source.push_str("import keel.FileInfo\nimport keel.Utilities\n");
        source.push_str("ModuleProvider {\n");
        let _ = writeln!(source, "    name: {}", Variant::string(name.to_string()).to_literal());
        let _ = writeln!(source, "    property var config: ({})", config.to_literal());
        let _ = writeln!(
            source,
            "    property string baseDirPrefix: {}",
            Variant::string(base_dir_prefix).to_literal()
        );
        source.push_str(
            "    outputBaseDir: FileInfo.joinPaths(baseDirPrefix, Utilities.getHash(config))\n",
        );
        source.push_str(
            "    property stringList searchPaths: (relativeSearchPaths || []).map(function(p) { return FileInfo.joinPaths(outputBaseDir, p); })\n",
        );
        source.push_str("}\n");

        let mut temp_file = tempfile::Builder::new()
            .prefix("keel-provider-")
            .suffix(".keel")
            .tempfile()
            .map_err(|error| {
                ErrorInfo::resolve(
                    format!(
                        "Failed to create temporary file for running module provider for dependency '{name}': {error}"
                    ),
                    location.clone(),
                )
            })?;
        temp_file.write_all(source.as_bytes()).map_err(|error| {
            ErrorInfo::resolve(
                format!("Failed to write provider instance file: {error}"),
                location.clone(),
            )
        })?;
        let temp_path = temp_file.into_temp_path();
        let temp_path_string = temp_path.to_string_lossy().replace('\\', "/");
        self.temp_files.borrow_mut().push(temp_path);

        debug!(file = provider_file, "instantiating module provider");
        let instance = self.reader.read_file(&temp_path_string)?;
        let prototype = self.reader.read_file(provider_file)?;
        if prototype.item_type() != ItemType::ModuleProvider {
            return Err(ErrorInfo::resolve(
                format!(
                    "File '{provider_file}' declares an item of type '{}', but 'ModuleProvider' was expected.",
                    prototype.type_name()
                ),
                prototype.location(),
            ));
        }
        self.reader.link_prototype(&instance, &prototype);
        instance.set_parent(Some(product.item.id()));
        // Config overrides land on the instance as computed values.
        if let Variant::Map(entries) = config {
            for (key, value) in entries {
                if instance.property_declaration(self.evaluator.pool(), key).is_some() {
                    instance.set_property(key.clone(), Value::variant(value.clone()));
                }
            }
        }

        self.probes_resolver.resolve_probes(product, &instance)?;
        self.evaluator.string_list_value(&instance, "searchPaths")
    }
}

fn scoped_path(base: &str, name: &QualifiedId) -> String {
    let mut path = base.to_string();
    for component in name.segments() {
        path.push('/');
        path.push_str(component);
    }
    path.push_str("/provider.keel");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_ordering_is_stable() {
        let a = ProviderCacheKey {
            name: "conan".to_string(),
            config_hash: "00ff".to_string(),
            lookup: ModuleProviderLookup::Named,
        };
        let b = ProviderCacheKey {
            name: "conan".to_string(),
            config_hash: "00ff".to_string(),
            lookup: ModuleProviderLookup::Scoped,
        };
        assert!(a < b);
    }

    #[test]
    fn scoped_paths_follow_name_components() {
        let name = QualifiedId::from_string("org.tool");
        assert_eq!(
            scoped_path("/sp/module-providers", &name),
            "/sp/module-providers/org/tool/provider.keel"
        );
    }
}
