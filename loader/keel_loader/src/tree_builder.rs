//! Drives the loader pipeline: reads the root file, handles projects and
//! sub-projects, multiplexes products over profiles, resolves `Depends`
//! items through the module loader (with provider fallback), expands
//! `Export` items into shadow products, propagates module instances into
//! groups, and runs probes.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use keel_diagnostic::{ErrorInfo, Result};
use keel_ir::{
    fileinfo, CodeLocation, Item, ItemId, ItemModule, ItemType, JsSourceValue, QualifiedId,
    QualifiedIdSet, Value, ValuePtr, Variant, Version,
};

use crate::evaluator::Evaluator;
use crate::item_reader::ItemReader;
use crate::module_loader::{ModuleLoader, ProductContext};
use crate::module_provider::{ModuleProviderLoader, StoredModuleProviderInfo};
use crate::params::{tree_from_flat, SetupParameters, BASE_MODULE_NAME, SHADOW_PRODUCT_PREFIX};
use crate::probes::{ProbeRecord, ProbeStats, ProbesResolver};
use crate::progress::{check_cancelation, ProgressObserver};

/// Per-product output of the tree builder.
#[derive(Default)]
pub struct ProductInfo {
    pub probes: Vec<Rc<ProbeRecord>>,
    /// Group item -> qualified module properties the group overrides.
    pub module_properties_set_in_groups: FxHashMap<ItemId, QualifiedIdSet>,
    /// Error encountered while loading; the resolver decides how to
    /// surface it (strict vs. relaxed).
    pub delayed_error: Option<ErrorInfo>,
}

/// The raw loaded tree plus everything the resolver needs alongside it.
pub struct LoadResult {
    pub root: Item,
    pub product_infos: FxHashMap<ItemId, ProductInfo>,
    pub project_probes: Vec<Rc<ProbeRecord>>,
    pub stored_module_provider_info: StoredModuleProviderInfo,
    pub build_system_files: Vec<String>,
    /// Expanded configuration per multiplexed profile.
    pub profile_configs: Variant,
    pub probe_stats: ProbeStats,
}

struct ExportInfo {
    export_item: Item,
    dependencies_resolved: bool,
}

/// Outcome of a module lookup for one `Depends` entry.
enum LoadedModule {
    Loaded(Item),
    /// A module file was read, but its condition is false for this
    /// product (or its type was wrong).
    Disabled,
    NotFound,
}

/// Composes the loader stages to load a project into a raw tree.
pub struct ProjectTreeBuilder<'a> {
    params: &'a SetupParameters,
    reader: &'a ItemReader,
    evaluator: &'a Evaluator,
    progress: Option<&'a dyn ProgressObserver>,
    old_project_probes: Vec<ProbeRecord>,
    old_product_probes: BTreeMap<String, Vec<ProbeRecord>>,
    last_resolve_time: u64,
    stored_module_provider_info: StoredModuleProviderInfo,
}

impl<'a> ProjectTreeBuilder<'a> {
    pub fn new(
        params: &'a SetupParameters,
        reader: &'a ItemReader,
        evaluator: &'a Evaluator,
    ) -> Self {
        ProjectTreeBuilder {
            params,
            reader,
            evaluator,
            progress: None,
            old_project_probes: Vec::new(),
            old_product_probes: BTreeMap::new(),
            last_resolve_time: 0,
            stored_module_provider_info: StoredModuleProviderInfo::default(),
        }
    }

    pub fn set_progress_observer(&mut self, observer: Option<&'a dyn ProgressObserver>) {
        self.progress = observer;
    }

    pub fn set_old_project_probes(&mut self, probes: Vec<ProbeRecord>) {
        self.old_project_probes = probes;
    }

    pub fn set_old_product_probes(&mut self, probes: BTreeMap<String, Vec<ProbeRecord>>) {
        self.old_product_probes = probes;
    }

    pub fn set_last_resolve_time(&mut self, time: u64) {
        self.last_resolve_time = time;
    }

    pub fn set_stored_module_provider_info(&mut self, info: StoredModuleProviderInfo) {
        self.stored_module_provider_info = info;
    }

    /// Loads the project into a raw item tree.
    pub fn load(&self) -> Result<LoadResult> {
        let probes_resolver = ProbesResolver::new(self.params, self.evaluator);
        probes_resolver.set_old_project_probes(self.old_project_probes.clone());
        probes_resolver.set_old_product_probes(self.old_product_probes.clone());
        probes_resolver.set_last_resolve_time(self.last_resolve_time);
        let module_loader = ModuleLoader::new(self.params, self.reader, self.evaluator);
        let provider_loader = ModuleProviderLoader::new(
            self.params,
            self.reader,
            self.evaluator,
            &probes_resolver,
        );
        provider_loader.set_stored_module_provider_info(self.stored_module_provider_info.clone());

        let builder = Builder {
            params: self.params,
            reader: self.reader,
            evaluator: self.evaluator,
            module_loader: &module_loader,
            provider_loader: &provider_loader,
            probes_resolver: &probes_resolver,
            progress: self.progress,
            build_config_tree: self.params.final_build_configuration_tree()?,
            products: RefCell::new(Vec::new()),
            exports: RefCell::new(FxHashMap::default()),
            product_infos: RefCell::new(FxHashMap::default()),
            project_probe_records: RefCell::new(Vec::new()),
            profile_configs: RefCell::new(BTreeMap::new()),
            referenced_files: RefCell::new(FxHashSet::default()),
            depends_chain: RefCell::new(Vec::new()),
        };

        let root = builder.load_root()?;
        let result = LoadResult {
            root,
            product_infos: builder.product_infos.into_inner(),
            project_probes: builder.project_probe_records.into_inner(),
            stored_module_provider_info: provider_loader.stored_module_provider_info(),
            build_system_files: self.reader.files_read(),
            profile_configs: Variant::Map(builder.profile_configs.into_inner()),
            probe_stats: probes_resolver.stats(),
        };
        probes_resolver.print_profiling_info();
        Ok(result)
    }
}

struct Builder<'b> {
    params: &'b SetupParameters,
    reader: &'b ItemReader,
    evaluator: &'b Evaluator,
    module_loader: &'b ModuleLoader<'b>,
    provider_loader: &'b ModuleProviderLoader<'b>,
    probes_resolver: &'b ProbesResolver<'b>,
    progress: Option<&'b dyn ProgressObserver>,
    build_config_tree: Variant,
    products: RefCell<Vec<Rc<ProductContext>>>,
    exports: RefCell<FxHashMap<String, ExportInfo>>,
    product_infos: RefCell<FxHashMap<ItemId, ProductInfo>>,
    project_probe_records: RefCell<Vec<Rc<ProbeRecord>>>,
    profile_configs: RefCell<BTreeMap<String, Variant>>,
    referenced_files: RefCell<FxHashSet<String>>,
    depends_chain: RefCell<Vec<(QualifiedId, CodeLocation)>>,
}

impl<'b> Builder<'b> {
    fn pool(&self) -> &Rc<keel_ir::ItemPool> {
        self.evaluator.pool()
    }

    fn check_cancelation(&self) -> Result<()> {
        check_cancelation(self.progress, &self.params.configuration_name)
    }

    fn load_root(&self) -> Result<Item> {
        let root = self.reader.read_file(&self.params.project_file_path)?;
        let root = self.wrap_in_project_if_necessary(&root);
        self.handle_project(&root, None)?;

        // Dependency and export resolution needs every product known, so
        // it runs after the whole project tree was walked.
        let products: Vec<Rc<ProductContext>> = self.products.borrow().clone();
        if let Some(progress) = self.progress {
            progress.initialize("Loading project", products.len());
        }
        for product in &products {
            self.check_cancelation()?;
            let result = self.handle_product(product);
            let mut infos = self.product_infos.borrow_mut();
            let info = infos.entry(product.item.id()).or_default();
            info.probes = product.probes.borrow().clone();
            if let Err(error) = result {
                if error.is_cancellation() {
                    return Err(error);
                }
                debug!(product = %product.name, "product failed to load: {error}");
                info.delayed_error = Some(error);
            }
            drop(infos);
            if let Some(progress) = self.progress {
                progress.increment_progress_value();
            }
        }
        Ok(root)
    }

    fn wrap_in_project_if_necessary(&self, item: &Item) -> Item {
        if item.item_type() == ItemType::Project {
            return item.clone();
        }
        let project = self.pool().create(ItemType::Project);
        project.set_property_declarations(
            self.reader
                .builtins()
                .declarations_for(ItemType::Project)
                .to_vec(),
        );
        project.set_location(item.location());
        if let Some(file) = item.file() {
            project.set_file(file);
        }
        project.set_variant_property("condition", Variant::Bool(true));
        project.add_child(item);
        project
    }

    // Projects

    fn handle_project(&self, project_item: &Item, parent: Option<&Item>) -> Result<()> {
        self.check_cancelation()?;
        if let Some(parent) = parent {
            project_item.set_scope(Some(parent.id()));
        }
        let file_dir = project_item
            .file()
            .map(|f| f.dir_path.clone())
            .unwrap_or_default();
        let build_dir = format!(
            "{}/{}",
            self.params.build_root, self.params.configuration_name
        );
        project_item.set_variant_property("buildDirectory", Variant::string(&build_dir));
        project_item.set_variant_property("sourceDirectory", Variant::string(&file_dir));
        if !self.evaluator.property_was_set(project_item, "profile") {
            project_item.set_variant_property(
                "profile",
                Variant::string(self.params.top_level_profile.clone()),
            );
        }
        let project_name = self.evaluator.string_value(project_item, "name")?;
        let project_name = if project_name.is_empty() {
            fileinfo::base_name(
                &project_item
                    .file()
                    .map(|f| f.file_path.clone())
                    .unwrap_or_default(),
            )
            .to_string()
        } else {
            project_name
        };
        self.apply_item_overrides(project_item, &format!("projects.{project_name}"));
        self.handle_property_options(project_item)?;

        let extra_search_paths = self
            .evaluator
            .string_list_value(project_item, "keelSearchPaths")?
            .into_iter()
            .map(|path| fileinfo::resolve_path(&file_dir, &path))
            .collect::<Vec<_>>();
        if !extra_search_paths.is_empty() {
            // Stays pushed for the whole session; the subtree and its
            // products keep seeing these paths during later resolution.
            self.reader.push_extra_search_paths(extra_search_paths);
        }

        // Project-level probes run in project scope.
        let pseudo = self.pseudo_project_context(project_item);
        self.probes_resolver.resolve_probes(&pseudo, project_item)?;
        self.project_probe_records
            .borrow_mut()
            .extend(pseudo.probes.borrow().iter().cloned());

        for child_id in project_item.children() {
            let child = self.pool().get(child_id);
            match child.item_type() {
                ItemType::Project => self.handle_project(&child, Some(project_item))?,
                ItemType::SubProject => self.handle_sub_project(&child, project_item)?,
                ItemType::Product => self.prepare_product(&child, project_item)?,
                _ => {}
            }
        }

        let references = self.evaluator.string_list_value(project_item, "references")?;
        for reference in references {
            let path = fileinfo::resolve_path(&file_dir, &reference);
            self.load_referenced_file(&path, project_item)?;
        }
        Ok(())
    }

    fn pseudo_project_context(&self, project_item: &Item) -> ProductContext {
        ProductContext {
            item: project_item.clone(),
            project_item: project_item.clone(),
            name: String::new(),
            unique_name: String::new(),
            profile: self.params.top_level_profile.clone(),
            module_properties: self.build_config_tree.clone(),
            probes: RefCell::new(Vec::new()),
            module_provider_config: RefCell::new(None),
        }
    }

    fn handle_sub_project(&self, sub_project_item: &Item, project_item: &Item) -> Result<()> {
        sub_project_item.set_scope(Some(project_item.id()));
        let file_path = self.evaluator.string_value(sub_project_item, "filePath")?;
        if file_path.is_empty() {
            return Err(ErrorInfo::resolve(
                "A SubProject item needs a 'filePath' property.",
                sub_project_item.location(),
            ));
        }
        let dir = sub_project_item
            .file()
            .map(|f| f.dir_path.clone())
            .unwrap_or_default();
        let resolved = fileinfo::resolve_path(&dir, &file_path);
        let loaded = self.reader.read_file(&resolved)?;
        let loaded = self.wrap_in_project_if_necessary(&loaded);
        // Conditional property overrides for the inner project.
        for child_id in sub_project_item.children() {
            let child = self.pool().get(child_id);
            if child.item_type() != ItemType::PropertiesInSubProject {
                continue;
            }
            child.set_scope(Some(project_item.id()));
            let applies = !self.evaluator.property_was_set(&child, "condition")
                || self.evaluator.bool_value(&child, "condition")?;
            if !applies {
                continue;
            }
            for (name, value) in child.properties() {
                if name != "condition" && name != "name" && !value.is_builtin_default() {
                    loaded.set_property(name, value);
                }
            }
        }
        let inherit = self
            .evaluator
            .bool_value(sub_project_item, "inheritProperties")?;
        sub_project_item.add_child(&loaded);
        self.handle_project(&loaded, inherit.then(|| project_item.clone()).as_ref())?;
        Ok(())
    }

    fn load_referenced_file(&self, path: &str, project_item: &Item) -> Result<()> {
        let canonical = fileinfo::clean_path(path);
        if !self.referenced_files.borrow_mut().insert(canonical.clone()) {
            return Err(ErrorInfo::resolve(
                format!("Cyclic project reference: '{canonical}' is already part of the project."),
                project_item.location(),
            ));
        }
        let loaded = self.reader.read_file(&canonical)?;
        project_item.add_child(&loaded);
        match loaded.item_type() {
            ItemType::Project => self.handle_project(&loaded, Some(project_item)),
            ItemType::Product => self.prepare_product(&loaded, project_item),
            other => Err(ErrorInfo::resolve(
                format!("Referenced file must contain a Project or Product item, not '{other}'."),
                loaded.location(),
            )),
        }
    }

    // Products

    fn prepare_product(&self, product_item: &Item, project_item: &Item) -> Result<()> {
        self.check_cancelation()?;
        product_item.set_scope(Some(project_item.id()));
        self.apply_properties_blocks(product_item)?;
        self.handle_property_options(product_item)?;

        let name = {
            let evaluated = self.evaluator.string_value(product_item, "name")?;
            if evaluated.is_empty() {
                let fallback = fileinfo::base_name(
                    &product_item
                        .file()
                        .map(|f| f.file_path.clone())
                        .unwrap_or_default(),
                )
                .to_string();
                product_item.set_variant_property("name", Variant::string(&fallback));
                fallback
            } else {
                evaluated
            }
        };
        self.apply_item_overrides(product_item, &format!("products.{name}"));

        // Multiplex across the profiles axis.
        let profiles = self.evaluator.string_list_value(product_item, "profiles")?;
        let profiles = if profiles.is_empty() {
            vec![self.params.top_level_profile.clone()]
        } else {
            profiles
        };
        let multiplexed = profiles.len() > 1;
        for (index, profile) in profiles.iter().enumerate() {
            let item = if index == 0 {
                product_item.clone()
            } else {
                let clone = self.clone_item_tree(product_item);
                project_item.add_child(&clone);
                clone.set_scope(Some(project_item.id()));
                clone
            };
            let multiplex_id = if multiplexed { profile.clone() } else { String::new() };
            self.setup_product_context(&item, project_item, &name, profile, &multiplex_id)?;
        }
        Ok(())
    }

    fn setup_product_context(
        &self,
        product_item: &Item,
        project_item: &Item,
        name: &str,
        profile: &str,
        multiplex_id: &str,
    ) -> Result<()> {
        let unique_name = if multiplex_id.is_empty() {
            name.to_string()
        } else {
            format!("{name}@{multiplex_id}")
        };
        product_item.set_variant_property("name", Variant::string(name));
        product_item.set_variant_property("profile", Variant::string(profile));
        product_item
            .set_variant_property("multiplexConfigurationId", Variant::string(multiplex_id));
        let project_build_dir = project_item
            .variant_property(self.pool(), "buildDirectory")
            .map(|v| v.value.to_display_string())
            .unwrap_or_default();
        product_item.set_variant_property(
            "buildDirectory",
            Variant::string(format!("{project_build_dir}/{unique_name}")),
        );
        let source_dir = product_item
            .file()
            .map(|f| f.dir_path.clone())
            .unwrap_or_default();
        product_item.set_variant_property("sourceDirectory", Variant::string(source_dir));

        let module_properties = self.configuration_for_profile(profile)?;
        let context = Rc::new(ProductContext {
            item: product_item.clone(),
            project_item: project_item.clone(),
            name: name.to_string(),
            unique_name,
            profile: profile.to_string(),
            module_properties,
            probes: RefCell::new(Vec::new()),
            module_provider_config: RefCell::new(None),
        });

        // Non-module children see the product in their scope chain.
        self.set_scope_for_descendants(product_item, product_item.id());

        // Export items become the product's published module surface.
        if let Some(export_item) = product_item.child_of_type(self.pool(), ItemType::Export) {
            self.exports.borrow_mut().insert(
                name.to_string(),
                ExportInfo {
                    export_item,
                    dependencies_resolved: false,
                },
            );
        }
        self.products.borrow_mut().push(context);
        Ok(())
    }

    fn configuration_for_profile(&self, profile: &str) -> Result<Variant> {
        if profile == self.params.top_level_profile {
            return Ok(self.build_config_tree.clone());
        }
        if let Some(existing) = self.profile_configs.borrow().get(profile) {
            return Ok(existing.clone());
        }
        let mut flat = self.params.profiles.flattened(profile)?;
        flat.insert(
            format!("{BASE_MODULE_NAME}.configurationName"),
            Variant::string(self.params.configuration_name.clone()),
        );
        flat.insert(
            format!("{BASE_MODULE_NAME}.profile"),
            Variant::string(profile),
        );
        for (key, value) in &self.params.overridden_values {
            if key.starts_with("projects.") || key.starts_with("products.") {
                continue;
            }
            flat.insert(key.clone(), value.clone());
        }
        let tree = tree_from_flat(&flat);
        self.profile_configs
            .borrow_mut()
            .insert(profile.to_string(), tree.clone());
        Ok(tree)
    }

    /// Loads dependencies, probes and groups for one product.
    fn handle_product(&self, product: &ProductContext) -> Result<()> {
        debug!(product = %product.unique_name, "handling product");
        let search_path_depth = self.reader.extra_search_paths_depth();

        self.load_base_module(product)?;
        self.resolve_depends_items(product, &product.item, true)?;
        self.add_transitive_dependencies(product);

        let modules = product.item.modules();
        self.module_loader.check_dependency_parameter_declarations(
            &product.item,
            &product.name,
            &modules,
        )?;

        self.probes_resolver.resolve_probes(product, &product.item)?;
        self.copy_groups_from_modules(product);
        self.propagate_modules_to_groups(product, &product.item.clone());

        // Provider-added search paths are scoped to this product.
        while self.reader.extra_search_paths_depth() > search_path_depth {
            self.reader.pop_extra_search_paths();
        }
        Ok(())
    }

    fn load_base_module(&self, product: &ProductContext) -> Result<()> {
        let prototype = self.module_loader.base_module_prototype(product);
        let name = QualifiedId::from_string(BASE_MODULE_NAME);
        let instance = self.instantiate_module(product, &name, &prototype);
        product.item.add_module(ItemModule {
            name,
            item: instance.id(),
            product_item: None,
            parameters: Variant::Undefined,
            required: true,
            limit_to_sub_project: false,
        });
        Ok(())
    }

    /// Walks `Depends` children of `item` in order and loads the modules
    /// they name into the product.
    fn resolve_depends_items(
        &self,
        product: &ProductContext,
        item: &Item,
        into_product: bool,
    ) -> Result<()> {
        for child_id in item.children() {
            let child = self.pool().get(child_id);
            if child.item_type() != ItemType::Depends {
                continue;
            }
            self.check_cancelation()?;
            if !self.evaluator.bool_value(&child, "condition")? {
                continue;
            }
            self.resolve_depends_item(product, item, &child, into_product)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn resolve_depends_item(
        &self,
        product: &ProductContext,
        parent: &Item,
        depends_item: &Item,
        into_product: bool,
    ) -> Result<()> {
        let name = self.evaluator.string_value(depends_item, "name")?;
        let submodules = self.evaluator.string_list_value(depends_item, "submodules")?;
        let product_types = self
            .evaluator
            .string_list_value(depends_item, "productTypes")?;
        let required = self.evaluator.bool_value(depends_item, "required")?;
        let limit_to_sub_project = self
            .evaluator
            .bool_value(depends_item, "limitToSubProject")?;
        let parameters = self.collect_depends_parameters(depends_item)?;

        if !product_types.is_empty() {
            // Depend on every product whose type intersects.
            let products = self.products.borrow().clone();
            for other in products {
                if other.item.id() == product.item.id() {
                    continue;
                }
                let types = self.evaluator.string_list_value(&other.item, "type")?;
                if types.iter().any(|t| product_types.contains(t)) {
                    self.add_product_dependency(product, &other.name, depends_item, &parameters)?;
                }
            }
            return Ok(());
        }

        if name.is_empty() {
            return Err(ErrorInfo::resolve(
                "A Depends item needs a 'name' or 'productTypes' property.",
                depends_item.location(),
            ));
        }

        let module_names: Vec<QualifiedId> = if submodules.is_empty() {
            vec![QualifiedId::from_string(&name)]
        } else {
            submodules
                .iter()
                .map(|sub| QualifiedId::from_string(&name).appended(sub.clone()))
                .collect()
        };

        for module_name in module_names {
            // Product dependencies take precedence over modules.
            if submodules.is_empty() && self.is_known_product(&name, product) {
                self.add_product_dependency(product, &name, depends_item, &parameters)?;
                continue;
            }

            let chain_entry = (module_name.clone(), depends_item.location());
            if self
                .depends_chain
                .borrow()
                .iter()
                .any(|(entry, _)| entry == &module_name)
            {
                return Err(ErrorInfo::resolve(
                    format!("Cyclic dependency on module '{module_name}' detected."),
                    depends_item.location(),
                ));
            }
            self.depends_chain.borrow_mut().push(chain_entry);
            let loaded = self.load_module(product, depends_item, &module_name, required);
            self.depends_chain.borrow_mut().pop();

            let module_item = match loaded? {
                LoadedModule::Loaded(item) => Some(item),
                // A module whose condition is false counts as absent, but
                // is not an error even for required dependencies.
                LoadedModule::Disabled => None,
                LoadedModule::NotFound => {
                    if required {
                        return Err(ErrorInfo::resolve(
                            format!(
                                "Dependency '{module_name}' not found for product '{}'.",
                                product.name
                            ),
                            depends_item.location(),
                        ));
                    }
                    None
                }
            };
            let Some(module_item) = module_item else {
                let non_present = self
                    .module_loader
                    .create_non_present_module(&module_name, "not found");
                self.attach_module_instance(product, &module_name, &non_present);
                let target = if into_product { &product.item } else { parent };
                target.add_module(ItemModule {
                    name: module_name,
                    item: non_present.id(),
                    product_item: None,
                    parameters: parameters.clone(),
                    required: false,
                    limit_to_sub_project,
                });
                continue;
            };

            self.check_version_requirements(depends_item, &module_item, &module_name)?;
            let target = if into_product { &product.item } else { parent };
            if !target
                .modules()
                .iter()
                .any(|module| module.name == module_name)
            {
                target.add_module(ItemModule {
                    name: module_name.clone(),
                    item: module_item.id(),
                    product_item: None,
                    parameters: parameters.clone(),
                    required,
                    limit_to_sub_project,
                });
            }
            self.module_loader
                .forward_parameter_declarations(depends_item, &target.modules());
        }
        Ok(())
    }

    fn collect_depends_parameters(&self, depends_item: &Item) -> Result<Variant> {
        // Nested assignments (`cpp.linkWholeArchive: true`) become the
        // dependency's parameter map.
        fn collect(
            builder: &Builder<'_>,
            item: &Item,
            map: &mut BTreeMap<String, Variant>,
        ) -> Result<()> {
            for (name, value) in item.properties() {
                if let Some(nested) = value.as_item() {
                    let nested_item = builder.pool().get(nested);
                    let mut inner = BTreeMap::new();
                    collect(builder, &nested_item, &mut inner)?;
                    map.insert(name, Variant::Map(inner));
                } else {
                    let (variant, _) = builder.evaluator.evaluate_value(item, &name, &value)?;
                    map.insert(name, variant);
                }
            }
            Ok(())
        }
        let mut parameters = BTreeMap::new();
        for (name, value) in depends_item.properties() {
            if let Some(nested) = value.as_item() {
                let nested_item = self.pool().get(nested);
                let mut inner = BTreeMap::new();
                collect(self, &nested_item, &mut inner)?;
                parameters.insert(name, Variant::Map(inner));
            }
        }
        Ok(Variant::Map(parameters))
    }

    fn is_known_product(&self, name: &str, consumer: &ProductContext) -> bool {
        self.products
            .borrow()
            .iter()
            .any(|p| p.name == name && p.item.id() != consumer.item.id())
    }

    fn add_product_dependency(
        &self,
        product: &ProductContext,
        dependency_name: &str,
        depends_item: &Item,
        parameters: &Variant,
    ) -> Result<()> {
        let Some(dependency) = self
            .products
            .borrow()
            .iter()
            .find(|p| p.name == dependency_name)
            .cloned()
        else {
            return Err(ErrorInfo::resolve(
                format!("Product dependency '{dependency_name}' not found."),
                depends_item.location(),
            ));
        };
        debug!(from = %product.name, to = %dependency_name, "adding product dependency");
        let module_name = QualifiedId::from_segments([dependency_name]);

        self.resolve_export_dependencies(&dependency)?;
        let export_modules = {
            let exports = self.exports.borrow();
            exports
                .get(dependency_name)
                .map(|info| (info.export_item.clone(), info.export_item.modules()))
        };
        let instance = match &export_modules {
            Some((export_item, _)) => {
                let instance = self.pool().create(ItemType::ModuleInstancePlaceholder);
                instance.set_prototype(Some(export_item.id()));
                instance.set_scope(Some(dependency.item.id()));
                instance.set_variant_property("name", Variant::string(dependency_name));
                instance
            }
            None => {
                // No export surface; the dependency is an edge only.
                let instance = self.pool().create(ItemType::ModuleInstancePlaceholder);
                instance.set_variant_property("name", Variant::string(dependency_name));
                instance
            }
        };
        self.attach_module_instance(product, &module_name, &instance);
        product.item.add_module(ItemModule {
            name: module_name,
            item: instance.id(),
            product_item: Some(dependency.item.id()),
            parameters: parameters.clone(),
            required: true,
            limit_to_sub_project: false,
        });

        // Modules the export depends on become visible to the consumer.
        if let Some((_, modules)) = export_modules {
            for module in modules {
                if module.name.to_string() == BASE_MODULE_NAME {
                    continue;
                }
                if !product
                    .item
                    .modules()
                    .iter()
                    .any(|existing| existing.name == module.name)
                {
                    product.item.add_module(module);
                }
            }
        }
        Ok(())
    }

    /// Resolves the `Depends` children of a product's export item once,
    /// in the exporting product's context (shadow-product semantics).
    fn resolve_export_dependencies(&self, exporting: &ProductContext) -> Result<()> {
        let export_item = {
            let mut exports = self.exports.borrow_mut();
            let Some(info) = exports.get_mut(&exporting.name) else {
                return Ok(());
            };
            if info.dependencies_resolved {
                return Ok(());
            }
            info.dependencies_resolved = true;
            info.export_item.clone()
        };
        // Modules load against the export item itself, so overrides
        // declared inside the `Export` block land on the instances the
        // consumers adopt.
        let shadow = ProductContext {
            item: export_item.clone(),
            project_item: exporting.project_item.clone(),
            name: format!("{SHADOW_PRODUCT_PREFIX}{}", exporting.name),
            unique_name: format!("{SHADOW_PRODUCT_PREFIX}{}", exporting.unique_name),
            profile: exporting.profile.clone(),
            module_properties: exporting.module_properties.clone(),
            probes: RefCell::new(Vec::new()),
            module_provider_config: RefCell::new(None),
        };
        export_item.set_scope(Some(exporting.item.id()));
        self.resolve_depends_items(&shadow, &export_item, false)?;
        self.probes_resolver.resolve_probes(&shadow, &export_item)?;
        self.project_probe_records
            .borrow_mut()
            .extend(shadow.probes.borrow().iter().cloned());
        Ok(())
    }

    fn load_module(
        &self,
        product: &ProductContext,
        depends_item: &Item,
        module_name: &QualifiedId,
        required: bool,
    ) -> Result<LoadedModule> {
        let mut candidates = self.module_loader.search_module_files(module_name);
        let mut tried_provider = false;
        loop {
            let mut tried_to_load = false;
            for candidate in &candidates {
                let (module, tried) =
                    self.module_loader
                        .load_module_file(product, module_name, candidate)?;
                tried_to_load = tried_to_load || tried;
                if let Some(prototype) = module {
                    self.module_loader.check_profile_errors_for_module(
                        &prototype,
                        module_name,
                        &product.name,
                        &product.profile,
                    )?;
                    let instance = self.instantiate_module(product, module_name, &prototype);
                    // Module-level dependencies load into the product.
                    self.resolve_depends_items(product, &prototype, true)?;
                    self.probes_resolver.resolve_probes(product, &prototype)?;
                    return Ok(LoadedModule::Loaded(instance));
                }
            }
            if tried_to_load {
                return Ok(LoadedModule::Disabled);
            }
            if tried_provider || !candidates.is_empty() {
                return Ok(LoadedModule::NotFound);
            }
            tried_provider = true;
            let fallback_enabled = self.params.fallback_provider_enabled
                && self.evaluator.bool_value(depends_item, "enableFallback")?;
            let result = self.provider_loader.execute_module_provider(
                product,
                &depends_item.location(),
                module_name,
                fallback_enabled,
            );
            match result {
                Ok(result) => {
                    if !result.provider_added_search_paths {
                        return Ok(LoadedModule::NotFound);
                    }
                    candidates = self.module_loader.search_module_files(module_name);
                    if candidates.is_empty() {
                        return Ok(LoadedModule::NotFound);
                    }
                }
                Err(error) => {
                    if required {
                        return Err(error);
                    }
                    return Ok(LoadedModule::NotFound);
                }
            }
        }
    }

    fn check_version_requirements(
        &self,
        depends_item: &Item,
        module_item: &Item,
        module_name: &QualifiedId,
    ) -> Result<()> {
        let at_least = self.evaluator.string_value(depends_item, "versionAtLeast")?;
        let below = self.evaluator.string_value(depends_item, "versionBelow")?;
        if at_least.is_empty() && below.is_empty() {
            return Ok(());
        }
        let version_string = self.evaluator.string_value(module_item, "version")?;
        let version = Version::from_string(&version_string).unwrap_or_default();
        if !at_least.is_empty() {
            let wanted = Version::from_string(&at_least).ok_or_else(|| {
                ErrorInfo::resolve(
                    format!("Invalid version string '{at_least}'."),
                    depends_item.location(),
                )
            })?;
            if version < wanted {
                return Err(ErrorInfo::resolve(
                    format!(
                        "Module '{module_name}' has version {version}, but at least {wanted} is required."
                    ),
                    depends_item.location(),
                ));
            }
        }
        if !below.is_empty() {
            let limit = Version::from_string(&below).ok_or_else(|| {
                ErrorInfo::resolve(
                    format!("Invalid version string '{below}'."),
                    depends_item.location(),
                )
            })?;
            if version >= limit {
                return Err(ErrorInfo::resolve(
                    format!(
                        "Module '{module_name}' has version {version}, but a version below {limit} is required."
                    ),
                    depends_item.location(),
                ));
            }
        }
        Ok(())
    }

    /// Creates (or adopts) the per-product instance of a module: the
    /// product's placeholder item (holding any `module.prop: ...`
    /// assignments) gets the shared prototype and the product as scope.
    fn instantiate_module(
        &self,
        product: &ProductContext,
        module_name: &QualifiedId,
        prototype: &Item,
    ) -> Item {
        let instance = self.module_instance_item(&product.item, module_name);
        instance.set_prototype(Some(prototype.id()));
        instance.set_item_type(ItemType::ModuleInstancePlaceholder);
        instance.set_scope(Some(product.item.id()));
        instance.set_variant_property("name", Variant::string(module_name.to_string()));
        for (name, value) in instance.properties() {
            if let Value::JsSource(source) = &*value {
                if let Some(base) = prototype.property(self.pool(), &name) {
                    source.set_base(Some(base));
                }
            }
        }
        instance
    }

    fn attach_module_instance(
        &self,
        product: &ProductContext,
        module_name: &QualifiedId,
        instance: &Item,
    ) {
        // Replace whatever placeholder the consumer created with the
        // actual instance when they are distinct items.
        let existing = self.module_instance_item(&product.item, module_name);
        if existing.id() != instance.id() {
            self.set_item_value_path(&product.item, module_name, instance.id());
        }
    }

    /// The nested item addressed by a qualified module name, creating
    /// prefix items as needed.
    fn module_instance_item(&self, item: &Item, module_name: &QualifiedId) -> Item {
        let mut current = item.clone();
        let segments = module_name.segments();
        for (index, segment) in segments.iter().enumerate() {
            let is_last = index == segments.len() - 1;
            if let Some(existing) = current.own_property(segment).and_then(|v| v.as_item()) {
                current = self.pool().get(existing);
                if is_last && current.item_type() == ItemType::ModulePrefix {
                    current.set_item_type(ItemType::ModuleInstancePlaceholder);
                }
                continue;
            }
            let typ = if is_last {
                ItemType::ModuleInstancePlaceholder
            } else {
                ItemType::ModulePrefix
            };
            let nested = self.pool().create(typ);
            nested.set_location(current.location());
            if let Some(file) = current.file() {
                nested.set_file(file);
            }
            current.set_property(segment.clone(), Value::item(nested.id()));
            current = nested;
        }
        current
    }

    fn set_item_value_path(&self, item: &Item, module_name: &QualifiedId, target: ItemId) {
        let mut current = item.clone();
        let segments = module_name.segments();
        for segment in &segments[..segments.len() - 1] {
            let next = match current.own_property(segment).and_then(|v| v.as_item()) {
                Some(existing) => self.pool().get(existing),
                None => {
                    let nested = self.pool().create(ItemType::ModulePrefix);
                    current.set_property(segment.clone(), Value::item(nested.id()));
                    nested
                }
            };
            current = next;
        }
        if let Some(last) = segments.last() {
            current.set_property(last.clone(), Value::item(target));
        }
    }

    /// Adds the modules of loaded modules to the product (dependencies are
    /// transitive), keeping first-encounter order.
    fn add_transitive_dependencies(&self, product: &ProductContext) {
        let mut index = 0;
        loop {
            let modules = product.item.modules();
            if index >= modules.len() {
                break;
            }
            let module = modules[index].clone();
            index += 1;
            let module_item = self.pool().get(module.item);
            for transitive in module_item.modules() {
                if !product
                    .item
                    .modules()
                    .iter()
                    .any(|existing| existing.name == transitive.name)
                {
                    product.item.add_module(transitive);
                }
            }
        }
    }

    /// Copies `Group` children of module prototypes into the product, so
    /// module-supplied files become product sources tagged with the module.
    fn copy_groups_from_modules(&self, product: &ProductContext) {
        for module in product.item.modules() {
            if module.product_item.is_some() {
                continue;
            }
            let module_item = self.pool().get(module.item);
            let mut current = Some(module_item);
            while let Some(node) = current {
                for child_id in node.children() {
                    let child = self.pool().get(child_id);
                    if child.item_type() == ItemType::Group {
                        let copy = self.clone_item_tree(&child);
                        copy.set_variant_property(
                            "targetOfModule",
                            Variant::string(module.name.to_string()),
                        );
                        copy.set_scope(Some(product.item.id()));
                        product.item.add_child(&copy);
                    }
                }
                current = node.prototype().map(|id| self.pool().get(id));
            }
        }
    }

    /// Gives every group its own view of the product's modules. A group
    /// that overrides module properties gets instances chained to the
    /// product's, with `outer` bound to the product-level value, and the
    /// overridden ids are recorded for the resolver.
    fn propagate_modules_to_groups(&self, product: &ProductContext, item: &Item) {
        for child_id in item.children() {
            let child = self.pool().get(child_id);
            if child.item_type() != ItemType::Group {
                continue;
            }
            let mut group_modules = Vec::new();
            let mut overridden = QualifiedIdSet::new();
            for module in product.item.modules() {
                let group_override = self.group_override_item(&child, &module.name);
                match group_override {
                    Some(override_item) => {
                        let product_instance = self.pool().get(module.item);
                        override_item.set_prototype(Some(module.item));
                        override_item.set_item_type(ItemType::ModuleInstancePlaceholder);
                        override_item.set_scope(Some(product.item.id()));
                        override_item
                            .set_variant_property("name", Variant::string(module.name.to_string()));
                        for (name, value) in override_item.properties() {
                            if let Value::JsSource(source) = &*value {
                                source.outer_item.set(Some(product_instance.id()));
                                if let Some(base) =
                                    product_instance.property(self.pool(), &name)
                                {
                                    source.set_base(Some(base));
                                }
                                overridden.insert(module.name.appended(name.clone()));
                            }
                        }
                        group_modules.push(ItemModule {
                            item: override_item.id(),
                            ..module.clone()
                        });
                    }
                    None => group_modules.push(module.clone()),
                }
            }
            child.set_modules(group_modules);
            if !overridden.is_empty() {
                self.product_infos
                    .borrow_mut()
                    .entry(product.item.id())
                    .or_default()
                    .module_properties_set_in_groups
                    .insert(child.id(), overridden);
            }
            // Nested groups inherit recursively.
            self.propagate_modules_to_groups(product, &child);
        }
    }

    /// The group's own nested item for a module name, if the group
    /// overrides any of its properties.
    fn group_override_item(&self, group: &Item, module_name: &QualifiedId) -> Option<Item> {
        let mut current = group.clone();
        for segment in module_name.segments() {
            let nested = current.own_property(segment).and_then(|v| v.as_item())?;
            current = self.pool().get(nested);
        }
        // `name` is set during instantiation, not an override.
        Some(current)
    }

    // Shared helpers

    fn apply_item_overrides(&self, item: &Item, prefix: &str) {
        for (key, value) in self.params.overrides_for(prefix) {
            let converted = match item.property_declaration(self.pool(), &key) {
                Some(decl) => self.evaluator.convert_to_declared_type(&decl, &value),
                None => value,
            };
            item.set_variant_property(key, converted);
        }
    }

    /// Applies condition-guarded `Properties` blocks: the first block whose
    /// condition holds supplies values the item does not set itself.
    fn apply_properties_blocks(&self, item: &Item) -> Result<()> {
        for child_id in item.children() {
            let child = self.pool().get(child_id);
            if child.item_type() != ItemType::Properties {
                continue;
            }
            child.set_scope(Some(item.id()));
            if !self.evaluator.property_was_set(&child, "condition") {
                return Err(ErrorInfo::resolve(
                    "A Properties item needs a 'condition' property.",
                    child.location(),
                ));
            }
            if !self.evaluator.bool_value(&child, "condition")? {
                continue;
            }
            for (name, value) in child.properties() {
                if name == "condition" || value.is_builtin_default() {
                    continue;
                }
                if self.evaluator.property_was_set(item, &name) {
                    continue;
                }
                item.set_property(name, value);
            }
        }
        Ok(())
    }

    fn handle_property_options(&self, item: &Item) -> Result<()> {
        for child_id in item.children() {
            let child = self.pool().get(child_id);
            if child.item_type() != ItemType::PropertyOptions {
                continue;
            }
            let name = self.evaluator.string_value(&child, "name")?;
            if name.is_empty() {
                return Err(ErrorInfo::resolve(
                    "A PropertyOptions item needs a 'name' property.",
                    child.location(),
                ));
            }
            let allowed = self.evaluator.string_list_value(&child, "allowedValues")?;
            if let Some(mut decl) = item.property_declaration(self.pool(), &name) {
                decl.allowed_values = allowed;
                item.set_property_declaration(decl);
            }
        }
        Ok(())
    }

    fn set_scope_for_descendants(&self, item: &Item, scope: ItemId) {
        for child_id in item.children() {
            let child = self.pool().get(child_id);
            child.set_scope(Some(scope));
            self.set_scope_for_descendants(&child, scope);
        }
    }

    /// Deep copy of an item subtree, including nested value items.
    fn clone_item_tree(&self, item: &Item) -> Item {
        let clone = self.pool().create(item.item_type());
        clone.set_location(item.location());
        clone.set_id_string(item.id_string());
        clone.set_prototype(item.prototype());
        if let Some(file) = item.file() {
            clone.set_file(file);
        }
        for decl in item.property_declarations() {
            clone.set_property_declaration(decl);
        }
        for (name, value) in item.properties() {
            clone.set_property(name, self.clone_value(&value));
        }
        for child_id in item.children() {
            let child_clone = self.clone_item_tree(&self.pool().get(child_id));
            clone.add_child(&child_clone);
        }
        clone
    }

    fn clone_value(&self, value: &ValuePtr) -> ValuePtr {
        match &**value {
            Value::JsSource(source) => {
                let copy = JsSourceValue::new(
                    Rc::clone(&source.source),
                    source.location.clone(),
                    Rc::clone(&source.file),
                );
                let copy = copy.with_function_form(source.has_function_form);
                let copy = if source.is_builtin_default {
                    copy.as_builtin_default()
                } else {
                    copy
                };
                copy.set_base(source.base_value());
                copy.outer_item.set(source.outer_item.get());
                Value::js_source(copy)
            }
            Value::Variant(variant) => Rc::new(Value::Variant(variant.clone())),
            Value::Item(nested) => {
                let nested_clone = self.clone_item_tree(&self.pool().get(*nested));
                Value::item(nested_clone.id())
            }
        }
    }
}
