//! Locating and preparing module prototypes.
//!
//! Module files are shared: one prototype item serves every product with
//! the same profile (profile defaults are merged into the prototype, which
//! is why prototypes are cached per `(file, profile)`). Whether a module is
//! enabled for a concrete product is a second cache keyed by
//! `(prototype, product item)`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use keel_diagnostic::{ErrorInfo, Result};
use keel_ir::{
    convert_to_property_type, CodeLocation, Item, ItemId, ItemModule, ItemType,
    PropertyDeclaration, QualifiedId, Value, Variant,
};

use crate::evaluator::Evaluator;
use crate::item_reader::ItemReader;
use crate::params::{ErrorHandlingMode, SetupParameters, BASE_MODULE_NAME};
use crate::probes::ProbeRecord;

/// Per-product state the module machinery needs.
pub struct ProductContext {
    pub item: Item,
    pub project_item: Item,
    pub name: String,
    pub unique_name: String,
    pub profile: String,
    /// The final build configuration tree; per-module subtrees supply
    /// profile defaults.
    pub module_properties: Variant,
    /// Probe results accumulated while loading this product.
    pub probes: RefCell<Vec<Rc<ProbeRecord>>>,
    /// Lazily computed module-provider configuration.
    pub module_provider_config: RefCell<Option<BTreeMap<String, Variant>>>,
}

impl ProductContext {
    /// The profile-supplied defaults for one module, as a flat map.
    pub fn profile_module_properties(&self, module_name: &QualifiedId) -> BTreeMap<String, Variant> {
        let mut tree = self.module_properties.clone();
        for segment in module_name.segments() {
            tree = tree.map_value(segment);
        }
        match tree {
            // Nested module names live inside the map; plain values are
            // the defaults themselves.
            Variant::Map(map) => map
                .into_iter()
                .filter(|(_, value)| !matches!(value, Variant::Map(_)))
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Loads module files into prototype items.
pub struct ModuleLoader<'a> {
    params: &'a SetupParameters,
    reader: &'a ItemReader,
    evaluator: &'a Evaluator,
    /// File path -> prototypes, one per profile.
    module_prototypes: RefCell<FxHashMap<String, Vec<(ItemId, String)>>>,
    /// Whether a prototype's condition held for a product item.
    enabled_info: RefCell<FxHashMap<(ItemId, ItemId), bool>>,
    unknown_profile_property_errors: RefCell<FxHashMap<ItemId, Vec<ErrorInfo>>>,
    parameter_declarations: RefCell<FxHashMap<ItemId, Vec<PropertyDeclaration>>>,
    base_module_prototypes: RefCell<FxHashMap<String, ItemId>>,
}

impl<'a> ModuleLoader<'a> {
    pub fn new(
        params: &'a SetupParameters,
        reader: &'a ItemReader,
        evaluator: &'a Evaluator,
    ) -> Self {
        ModuleLoader {
            params,
            reader,
            evaluator,
            module_prototypes: RefCell::new(FxHashMap::default()),
            enabled_info: RefCell::new(FxHashMap::default()),
            unknown_profile_property_errors: RefCell::new(FxHashMap::default()),
            parameter_declarations: RefCell::new(FxHashMap::default()),
            base_module_prototypes: RefCell::new(FxHashMap::default()),
        }
    }

    /// Whether a prototype's condition was already decided for a product.
    pub fn module_enabled_info(&self, prototype: ItemId, product_item: ItemId) -> Option<bool> {
        self.enabled_info
            .borrow()
            .get(&(prototype, product_item))
            .copied()
    }

    /// Candidate module files for a qualified name, over all search paths.
    pub fn search_module_files(&self, module_name: &QualifiedId) -> Vec<String> {
        let mut candidates = Vec::new();
        let dir_part = module_name.segments().join("/");
        let last = module_name.last().unwrap_or_default();
        let last_lower = last.to_lowercase();
        for search_path in self.reader.all_search_paths() {
            for file_name in [last, last_lower.as_str()] {
                let candidate =
                    format!("{search_path}/modules/{dir_part}/{file_name}.keel");
                if std::path::Path::new(&candidate).is_file()
                    && !candidates.contains(&candidate)
                {
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }

    /// Loads a module file as a prototype for the given product.
    ///
    /// Returns `(module, tried_to_load)`: no module plus `tried_to_load`
    /// means the file was read but is unusable (wrong type); a disabled
    /// condition also yields no module.
    pub fn load_module_file(
        &self,
        product: &ProductContext,
        module_name: &QualifiedId,
        file_path: &str,
    ) -> Result<(Option<Item>, bool)> {
        debug!(module = %module_name, file = file_path, "loadModuleFile");
        let (module, tried_to_load) = self.module_prototype(product, module_name, file_path)?;
        let Some(module) = module else {
            return Ok((None, tried_to_load));
        };

        let pool = self.evaluator.pool();
        let key = (module.id(), product.item.id());
        if let Some(enabled) = self.enabled_info.borrow().get(&key).copied() {
            debug!("prototype cache hit (level 2)");
            return Ok(((enabled).then_some(module), tried_to_load));
        }

        if !self.evaluate_module_condition(product, &module, module_name)? {
            debug!(module = %module_name, "condition is false");
            self.enabled_info.borrow_mut().insert(key, false);
            return Ok((None, tried_to_load));
        }

        if module_name.to_string() == BASE_MODULE_NAME {
            self.inject_base_module_properties(&module);
        } else {
            let mut declarations = Vec::new();
            for child_id in module.children() {
                let child = pool.get(child_id);
                if child.item_type() == ItemType::Parameter {
                    declarations.extend(child.property_declarations());
                }
            }
            self.parameter_declarations
                .borrow_mut()
                .insert(module.id(), declarations);
        }

        self.enabled_info.borrow_mut().insert(key, true);
        Ok((Some(module), tried_to_load))
    }

    fn module_prototype(
        &self,
        product: &ProductContext,
        module_name: &QualifiedId,
        file_path: &str,
    ) -> Result<(Option<Item>, bool)> {
        if let Some(prototypes) = self.module_prototypes.borrow().get(file_path) {
            for (item, profile) in prototypes {
                if *profile == product.profile {
                    debug!("prototype cache hit (level 1)");
                    return Ok((Some(self.evaluator.pool().get(*item)), true));
                }
            }
        }

        let module = self.reader.read_file(file_path)?;
        if module.item_type() != ItemType::Module {
            debug!(
                module = %module_name,
                actual_type = %module.type_name(),
                "alleged module has the wrong type"
            );
            return Ok((None, false));
        }
        self.module_prototypes
            .borrow_mut()
            .entry(file_path.to_string())
            .or_default()
            .push((module.id(), product.profile.clone()));

        // Module properties defined in the profile become defaults; this is
        // why prototypes are per profile.
        let profile_properties = product.profile_module_properties(module_name);
        let pool = self.evaluator.pool();
        for (key, value) in profile_properties {
            let Some(decl) = module.property_declaration(pool, &key) else {
                self.unknown_profile_property_errors
                    .borrow_mut()
                    .entry(module.id())
                    .or_default()
                    .push(ErrorInfo::profile(format!(
                        "Unknown property: {module_name}.{key}"
                    )));
                continue;
            };
            let converted = convert_to_property_type(&value, decl.typ, "");
            module.set_property(key, Value::variant_set_by_profile(converted));
        }

        Ok((Some(module), true))
    }

    fn evaluate_module_condition(
        &self,
        product: &ProductContext,
        module: &Item,
        module_name: &QualifiedId,
    ) -> Result<bool> {
        // The evaluator requires the module name to be set.
        module.set_variant_property("name", Variant::string(module_name.to_string()));

        // Temporarily expose the product's base-module instance so the
        // condition can read e.g. `keel.targetPlatform`; restored on exit.
        let needs_base_item = module_name.to_string() != BASE_MODULE_NAME;
        let previous = if needs_base_item {
            let saved = module.own_property(BASE_MODULE_NAME);
            if let Some(base_instance) = product.item.own_property(BASE_MODULE_NAME) {
                module.set_property(BASE_MODULE_NAME, base_instance);
            }
            Some(saved)
        } else {
            None
        };
        let result = self.evaluator.bool_value(module, "condition");
        if let Some(saved) = previous {
            match saved {
                Some(value) => module.set_property(BASE_MODULE_NAME, value),
                None => module.remove_property(BASE_MODULE_NAME),
            }
        }
        result
    }

    fn inject_base_module_properties(&self, module: &Item) {
        module.set_variant_property("hostPlatform", Variant::string(std::env::consts::OS));
        module.set_variant_property(
            "hostArchitecture",
            Variant::string(std::env::consts::ARCH),
        );
        module.set_variant_property(
            "libexecPath",
            Variant::string(self.params.libexec_path.clone()),
        );
        let version = env!("CARGO_PKG_VERSION");
        let mut parts = version.split(['.', '-']);
        let mut next_component = || {
            parts
                .next()
                .and_then(|p| p.parse::<i64>().ok())
                .unwrap_or(0)
        };
        module.set_variant_property("versionMajor", Variant::Int(next_component()));
        module.set_variant_property("versionMinor", Variant::Int(next_component()));
        module.set_variant_property("versionPatch", Variant::Int(next_component()));
    }

    /// The synthesized prototype of the always-present base module, one
    /// per profile.
    pub fn base_module_prototype(&self, product: &ProductContext) -> Item {
        if let Some(id) = self.base_module_prototypes.borrow().get(&product.profile) {
            return self.evaluator.pool().get(*id);
        }
        let pool = self.evaluator.pool();
        let module = pool.create(ItemType::Module);
        module.set_property_declarations(base_module_declarations());
        module.set_variant_property("name", Variant::string(BASE_MODULE_NAME));
        self.inject_base_module_properties(&module);
        module.set_variant_property(
            "targetPlatform",
            Variant::string(std::env::consts::OS),
        );
        let name = QualifiedId::from_string(BASE_MODULE_NAME);
        for (key, value) in product.profile_module_properties(&name) {
            if let Some(decl) = module.own_property_declaration(&key) {
                let converted = convert_to_property_type(&value, decl.typ, "");
                module.set_property(key, Value::variant_set_by_profile(converted));
            }
        }
        module.setup_builtin_defaults();
        self.base_module_prototypes
            .borrow_mut()
            .insert(product.profile.clone(), module.id());
        module
    }

    /// Reports profile values that named undeclared module properties.
    /// Aggregated per module and raised when the module lands in a product.
    pub fn check_profile_errors_for_module(
        &self,
        module: &Item,
        module_name: &QualifiedId,
        product_name: &str,
        profile: &str,
    ) -> Result<()> {
        let errors = self
            .unknown_profile_property_errors
            .borrow()
            .get(&module.id())
            .cloned();
        let Some(errors) = errors else {
            return Ok(());
        };
        let mut error = ErrorInfo::profile(format!(
            "Loading module '{module_name}' for product '{product_name}' failed due to invalid values in profile '{profile}':"
        ));
        for item in errors {
            error.append(item.to_string(), CodeLocation::unknown());
        }
        match self.params.property_checking_mode {
            ErrorHandlingMode::Strict => Err(error),
            ErrorHandlingMode::Relaxed => {
                warn!("{error}");
                Ok(())
            }
        }
    }

    /// Validates every parameter a product sets on its dependencies
    /// against the parameter schemas declared by the modules.
    pub fn check_dependency_parameter_declarations(
        &self,
        product_item: &Item,
        product_name: &str,
        modules: &[ItemModule],
    ) -> Result<()> {
        for module in modules {
            if let Variant::Map(parameters) = &module.parameters {
                if !parameters.is_empty() {
                    // Top-level keys of the parameter map are module names.
                    self.check_parameters(
                        product_item,
                        product_name,
                        modules,
                        &QualifiedId::new(),
                        parameters,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn check_parameters(
        &self,
        product_item: &Item,
        product_name: &str,
        modules: &[ItemModule],
        module_name: &QualifiedId,
        parameters: &BTreeMap<String, Variant>,
    ) -> Result<()> {
        let pool = self.evaluator.pool();
        for (key, value) in parameters {
            if let Variant::Map(nested) = value {
                self.check_parameters(
                    product_item,
                    product_name,
                    modules,
                    &module_name.appended(key.clone()),
                    nested,
                )?;
                continue;
            }
            let Some(module) = modules.iter().find(|m| &m.name == module_name) else {
                return Err(ErrorInfo::resolve(
                    format!(
                        "Cannot set parameter '{}', because '{product_name}' does not have a dependency on '{module_name}'.",
                        module_name.appended(key.clone())
                    ),
                    product_item.location(),
                ));
            };
            let prototype = pool.get(module.item).root_prototype(pool);
            let declared = self
                .parameter_declarations
                .borrow()
                .get(&prototype)
                .is_some_and(|declarations| declarations.iter().any(|d| &d.name == key));
            if !declared {
                return Err(ErrorInfo::resolve(
                    format!(
                        "Parameter '{}' is not declared.",
                        module_name.appended(key.clone())
                    ),
                    product_item.location(),
                ));
            }
        }
        Ok(())
    }

    /// Attaches the parameter schemas of matched modules to the nested
    /// items of a `Depends` item, so later evaluation can type-check the
    /// assignments.
    pub fn forward_parameter_declarations(&self, depends_item: &Item, modules: &[ItemModule]) {
        let pool = self.evaluator.pool();
        for (name, value) in depends_item.properties() {
            if let Some(nested) = value.as_item() {
                self.forward_into(
                    &QualifiedId::from_segments([name]),
                    &pool.get(nested),
                    modules,
                );
            }
        }
    }

    fn forward_into(&self, module_name: &QualifiedId, item: &Item, modules: &[ItemModule]) {
        let pool = self.evaluator.pool();
        if let Some(module) = modules.iter().find(|m| &m.name == module_name) {
            let prototype = pool.get(module.item).root_prototype(pool);
            if let Some(declarations) = self.parameter_declarations.borrow().get(&prototype) {
                item.set_property_declarations(declarations.clone());
            }
            return;
        }
        for (name, value) in item.properties() {
            if let Some(nested) = value.as_item() {
                self.forward_into(
                    &module_name.appended(name),
                    &pool.get(nested),
                    modules,
                );
            }
        }
    }

    /// A stand-in module instance for a dependency that could not be
    /// satisfied but was not required; `X.present` evaluates to false.
    pub fn create_non_present_module(&self, name: &QualifiedId, reason: &str) -> Item {
        debug!(module = %name, reason, "creating non-present module");
        let module = self.evaluator.pool().create(ItemType::ModuleInstancePlaceholder);
        module.set_variant_property("name", Variant::string(name.to_string()));
        module.set_variant_property("present", Variant::Bool(false));
        module
    }
}

fn base_module_declarations() -> Vec<PropertyDeclaration> {
    use keel_ir::PropertyType;
    vec![
        PropertyDeclaration::new("name", PropertyType::String).not_in_config(),
        PropertyDeclaration::new("condition", PropertyType::Boolean)
            .with_default(Variant::Bool(true)),
        PropertyDeclaration::new("present", PropertyType::Boolean)
            .with_default(Variant::Bool(true)),
        PropertyDeclaration::new("profiles", PropertyType::StringList),
        PropertyDeclaration::new("profile", PropertyType::String),
        PropertyDeclaration::new("configurationName", PropertyType::String),
        PropertyDeclaration::new("buildVariant", PropertyType::String)
            .with_default(Variant::string("debug")),
        PropertyDeclaration::new("hostPlatform", PropertyType::String),
        PropertyDeclaration::new("hostArchitecture", PropertyType::String),
        PropertyDeclaration::new("targetPlatform", PropertyType::String),
        PropertyDeclaration::new("libexecPath", PropertyType::Path),
        PropertyDeclaration::new("versionMajor", PropertyType::Integer),
        PropertyDeclaration::new("versionMinor", PropertyType::Integer),
        PropertyDeclaration::new("versionPatch", PropertyType::Integer),
        PropertyDeclaration::new("install", PropertyType::Boolean)
            .with_default(Variant::Bool(false)),
        PropertyDeclaration::new("installDir", PropertyType::String),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use keel_ir::ItemPool;
    use keel_js::ScriptEngine;

    use crate::evaluator::SharedEngine;
    use crate::params::tree_from_flat;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: String,
        pool: Rc<ItemPool>,
    }

    fn fixture(module_source: &str) -> (Fixture, ItemReader, Evaluator) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().replace('\\', "/");
        let module_dir = dir.path().join("modules/testmod");
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join("testmod.keel"), module_source).unwrap();
        let pool = Rc::new(ItemPool::new());
        let engine: SharedEngine = Rc::new(std::cell::RefCell::new(ScriptEngine::new()));
        let reader = ItemReader::new(Rc::clone(&pool));
        reader.set_search_paths(vec![root.clone()]);
        let evaluator = Evaluator::new(Rc::clone(&pool), engine);
        (
            Fixture {
                _dir: dir,
                root,
                pool,
            },
            reader,
            evaluator,
        )
    }

    fn product_context(fixture: &Fixture, config: BTreeMap<String, Variant>) -> ProductContext {
        let project_item = fixture.pool.create(ItemType::Project);
        let product_item = fixture.pool.create(ItemType::Product);
        product_item.set_scope(Some(project_item.id()));
        ProductContext {
            item: product_item,
            project_item,
            name: "app".to_string(),
            unique_name: "app".to_string(),
            profile: "testprofile".to_string(),
            module_properties: tree_from_flat(&config),
            probes: RefCell::new(Vec::new()),
            module_provider_config: RefCell::new(None),
        }
    }

    #[test]
    fn disabled_condition_is_cached_per_product() {
        let (fixture, reader, evaluator) =
            fixture("Module {\n    condition: false\n    property string x\n}\n");
        let params = SetupParameters::new("/p.keel", "/b");
        let loader = ModuleLoader::new(&params, &reader, &evaluator);
        let product = product_context(&fixture, BTreeMap::new());
        let name = QualifiedId::from_string("testmod");
        let file = format!("{}/modules/testmod/testmod.keel", fixture.root);

        let (module, tried) = loader.load_module_file(&product, &name, &file).unwrap();
        assert!(module.is_none());
        assert!(tried);

        // The decision is recorded for the (prototype, product) pair.
        let prototype = reader.read_file(&file).unwrap();
        let cached_prototype = loader
            .module_prototypes
            .borrow()
            .get(&file)
            .and_then(|list| list.first().map(|(id, _)| *id))
            .unwrap();
        assert_ne!(cached_prototype, prototype.id());
        assert_eq!(
            loader.module_enabled_info(cached_prototype, product.item.id()),
            Some(false)
        );

        // A second load hits the cache and still reports absence.
        let (module, _) = loader.load_module_file(&product, &name, &file).unwrap();
        assert!(module.is_none());
    }

    #[test]
    fn profile_values_are_marked_set_by_profile() {
        let (fixture, reader, evaluator) =
            fixture("Module {\n    property string feature: \"off\"\n}\n");
        let params = SetupParameters::new("/p.keel", "/b");
        let loader = ModuleLoader::new(&params, &reader, &evaluator);
        let config: BTreeMap<String, Variant> =
            [("testmod.feature".to_string(), Variant::string("on"))]
                .into_iter()
                .collect();
        let product = product_context(&fixture, config);
        let name = QualifiedId::from_string("testmod");
        let file = format!("{}/modules/testmod/testmod.keel", fixture.root);

        let (module, _) = loader.load_module_file(&product, &name, &file).unwrap();
        let module = module.unwrap();
        let value = module.own_property("feature").unwrap();
        let variant = value.as_variant().unwrap();
        assert_eq!(variant.value, Variant::string("on"));
        assert!(variant.set_by_profile);
    }

    #[test]
    fn unknown_profile_property_is_collected() {
        let (fixture, reader, evaluator) = fixture("Module {\n    property string known\n}\n");
        let params = SetupParameters::new("/p.keel", "/b");
        let loader = ModuleLoader::new(&params, &reader, &evaluator);
        let config: BTreeMap<String, Variant> =
            [("testmod.bogus".to_string(), Variant::string("x"))]
                .into_iter()
                .collect();
        let product = product_context(&fixture, config);
        let name = QualifiedId::from_string("testmod");
        let file = format!("{}/modules/testmod/testmod.keel", fixture.root);

        let (module, _) = loader.load_module_file(&product, &name, &file).unwrap();
        let module = module.unwrap();
        let error = loader
            .check_profile_errors_for_module(&module, &name, "app", "testprofile")
            .unwrap_err();
        assert!(error.to_string().contains("Unknown property: testmod.bogus"));
        assert!(error.to_string().contains("profile 'testprofile'"));
    }

    #[test]
    fn base_module_prototype_carries_host_information() {
        let (fixture, reader, evaluator) = fixture("Module {}\n");
        let params = SetupParameters::new("/p.keel", "/b");
        let loader = ModuleLoader::new(&params, &reader, &evaluator);
        let product = product_context(&fixture, BTreeMap::new());
        let prototype = loader.base_module_prototype(&product);
        let host = prototype.own_property("hostPlatform").unwrap();
        assert_eq!(
            host.as_variant().unwrap().value,
            Variant::string(std::env::consts::OS)
        );
        // One prototype per profile.
        let again = loader.base_module_prototype(&product);
        assert_eq!(prototype.id(), again.id());
    }
}
