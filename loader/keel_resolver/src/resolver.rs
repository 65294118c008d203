//! Walks the loaded item tree and produces the resolved model.
//!
//! Dispatch is per item type, mirroring the tree shape: projects own
//! products, file taggers, job limits and rules; products own groups,
//! rules, taggers, scanners (via modules) and exports. Errors accumulated
//! across products are queued and raised as one aggregate after the walk,
//! so a single invocation reports as many problems as possible.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use keel_diagnostic::{ErrorInfo, Result};
use keel_ir::{
    fileinfo, CodeLocation, FileTag, FileTags, Item, ItemModule, ItemPool, ItemType, QualifiedId,
    QualifiedIdSet, Value, Variant,
};
use keel_loader::{
    check_cancelation, ErrorHandlingMode, EvalCacheEnabler, Evaluator, ItemReader, LoadResult,
    ProbeRecord, ProductInfo, ProgressObserver, ProjectTreeBuilder, SetupParameters,
    StoredModuleProviderInfo, BASE_MODULE_NAME,
};

use crate::model::{
    ArtifactProperties, ExportedItem, ExportedModule, ExportedModuleDependency, ExportedProperty,
    FileTagger, JobLimits, ResolvedGroup, ResolvedModule, ResolvedProduct, ResolvedProject,
    ResolvedScanner, Rule, RuleArtifact, RuleArtifactBinding, ScriptFunction, SourceArtifact,
    SourceWildcards, TopLevelProject,
};

/// Produces a [`TopLevelProject`] from a setup request.
pub struct ProjectResolver<'a> {
    params: &'a SetupParameters,
    reader: &'a ItemReader,
    evaluator: &'a Evaluator,
    progress: Option<&'a dyn ProgressObserver>,
    old_project_probes: Vec<ProbeRecord>,
    old_product_probes: BTreeMap<String, Vec<ProbeRecord>>,
    last_resolve_time: u64,
    stored_module_provider_info: StoredModuleProviderInfo,
}

impl<'a> ProjectResolver<'a> {
    pub fn new(
        params: &'a SetupParameters,
        reader: &'a ItemReader,
        evaluator: &'a Evaluator,
    ) -> Self {
        ProjectResolver {
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

    /// Loads the project tree and resolves it into the final model.
    pub fn resolve(&self) -> Result<crate::setup::ResolveResult> {
        debug!(file = %self.params.project_file_path, "resolving project");
        let mut tree_builder = ProjectTreeBuilder::new(self.params, self.reader, self.evaluator);
        tree_builder.set_progress_observer(self.progress);
        tree_builder.set_old_project_probes(self.old_project_probes.clone());
        tree_builder.set_old_product_probes(self.old_product_probes.clone());
        tree_builder.set_last_resolve_time(self.last_resolve_time);
        tree_builder.set_stored_module_provider_info(self.stored_module_provider_info.clone());
        let load_result = tree_builder.load()?;

        let state = ResolveState {
            params: self.params,
            evaluator: self.evaluator,
            progress: self.progress,
            load_result: &load_result,
            pool: Rc::clone(self.evaluator.pool()),
            queued_errors: RefCell::new(Vec::new()),
        };
        let project = state.resolve_top_level(&load_result)?;
        Ok(crate::setup::ResolveResult {
            project,
            probe_stats: load_result.probe_stats,
        })
    }
}

/// Per-project accumulation shared by the products below it.
#[derive(Default)]
struct ProjectLevel {
    file_taggers: Vec<FileTagger>,
    rules: Vec<Rule>,
    /// Innermost-first chain of job limits, product gaps filled in order.
    job_limits_chain: Vec<JobLimits>,
}

/// Per-product state during group resolution.
#[derive(Default)]
struct ProductState {
    /// `(targetOfModule, absolute path)` -> location of first occurrence.
    source_artifact_locations: FxHashMap<(String, String), CodeLocation>,
    /// `fileTagsFilter` list -> (index into artifact_properties, file paths
    /// of the declaring groups).
    artifact_properties_per_filter: FxHashMap<Vec<String>, (usize, Vec<String>)>,
}

/// Inherited state for nested groups.
#[derive(Clone)]
struct GroupContext {
    enabled: bool,
    prefix: String,
    file_tags: FileTags,
    properties: BTreeMap<String, Variant>,
}

struct ResolveState<'r> {
    params: &'r SetupParameters,
    evaluator: &'r Evaluator,
    progress: Option<&'r dyn ProgressObserver>,
    load_result: &'r LoadResult,
    pool: Rc<ItemPool>,
    queued_errors: RefCell<Vec<ErrorInfo>>,
}

impl<'r> ResolveState<'r> {
    fn check_cancelation(&self) -> Result<()> {
        check_cancelation(self.progress, &self.params.configuration_name)
    }

    fn resolve_top_level(&self, load_result: &LoadResult) -> Result<TopLevelProject> {
        let mut top = TopLevelProject {
            build_directory: format!(
                "{}/{}",
                self.params.build_root, self.params.configuration_name
            ),
            build_configuration: self.params.final_build_configuration_tree()?,
            overridden_values: self.params.overridden_values.clone(),
            build_system_files: load_result.build_system_files.clone(),
            profile_configs: load_result.profile_configs.clone(),
            probes: load_result
                .project_probes
                .iter()
                .map(|p| (**p).clone())
                .collect(),
            module_provider_info: load_result.stored_module_provider_info.clone(),
            ..TopLevelProject::default()
        };

        top.project = self.resolve_project(&load_result.root, true)?;

        let queued = self.queued_errors.borrow_mut().split_off(0);
        if !queued.is_empty() {
            let mut aggregated = ErrorInfo::empty();
            for error in queued {
                aggregated.append_error(error);
            }
            return Err(aggregated);
        }

        make_sub_project_names_unique(&mut top.project);
        self.check_for_duplicate_product_names(&top)?;

        top.project.for_each_product_mut(&mut |product| {
            if !product.enabled {
                return;
            }
            apply_file_taggers(product);
            match_artifact_properties(product);
        });

        {
            let engine = self.evaluator.engine().borrow();
            let observations = engine.observations();
            top.canonical_file_path_results = observations.canonical_paths.clone();
            top.file_exists_results = observations.file_exists.clone();
            top.directory_entries_results = observations.directory_entries.clone();
            top.file_last_modified_results = observations.file_last_modified.clone();
            top.environment = self.params.environment.clone();
            let mut files = top.build_system_files.clone();
            files.extend(engine.imported_files());
            files.sort();
            files.dedup();
            top.build_system_files = files;
        }
        top.last_resolve_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Ok(top)
    }

    // Projects

    #[allow(clippy::too_many_lines)]
    fn resolve_project(&self, item: &Item, parent_enabled: bool) -> Result<ResolvedProject> {
        self.check_cancelation()?;
        let mut project = ResolvedProject {
            location: item.location(),
            enabled: parent_enabled && self.evaluator.bool_value(item, "condition")?,
            ..ResolvedProject::default()
        };
        project.name = self.evaluator.string_value(item, "name")?;
        if project.name.is_empty() {
            project.name = fileinfo::base_name(
                &item.file().map(|f| f.file_path.clone()).unwrap_or_default(),
            )
            .to_string();
        }
        if !project.enabled {
            project.project_properties.insert(
                "profile".to_string(),
                Variant::String(self.evaluator.string_value(item, "profile")?),
            );
            return Ok(project);
        }
        project.project_properties =
            self.evaluate_item_properties(item, item, BTreeMap::new(), true, true)?;

        let mut level = ProjectLevel::default();
        let mut project_job_limits = JobLimits::default();

        for child_id in item.children() {
            let child = self.pool.get(child_id);
            let result = self.resolve_project_child(
                &child,
                &mut project,
                &mut level,
                &mut project_job_limits,
            );
            if let Err(error) = result {
                if error.is_cancellation() {
                    return Err(error);
                }
                self.queued_errors.borrow_mut().push(error);
            }
        }

        level.job_limits_chain.insert(0, project_job_limits);

        // Project-level taggers and rules apply to every product below.
        level
            .file_taggers
            .sort_by(|a, b| b.priority.cmp(&a.priority));
        for product in &mut project.products {
            product.file_taggers.extend(level.file_taggers.iter().cloned());
            product
                .file_taggers
                .sort_by(|a, b| b.priority.cmp(&a.priority));
            for rule in &level.rules {
                product.rules.push(rule.clone());
            }
            for limits in &level.job_limits_chain {
                product.job_limits.fill_from(limits);
            }
        }
        Ok(project)
    }

    fn resolve_project_child(
        &self,
        child: &Item,
        project: &mut ResolvedProject,
        level: &mut ProjectLevel,
        project_job_limits: &mut JobLimits,
    ) -> Result<()> {
        match child.item_type() {
            ItemType::Project => {
                let sub = self.resolve_project(child, project.enabled)?;
                project.sub_projects.push(sub);
            }
            ItemType::SubProject => {
                if let Some(inner) = child.child_of_type(&self.pool, ItemType::Project) {
                    let sub = self.resolve_project(&inner, project.enabled)?;
                    project.sub_projects.push(sub);
                } else {
                    // No project item: the sub-project was disabled.
                    let mut sub = ResolvedProject::default();
                    if let Some(props) =
                        child.child_of_type(&self.pool, ItemType::PropertiesInSubProject)
                    {
                        sub.name = self.evaluator.string_value(&props, "name")?;
                    }
                    project.sub_projects.push(sub);
                }
            }
            ItemType::Product => {
                let product = self.resolve_product(child, project.enabled)?;
                project.products.push(product);
            }
            ItemType::FileTagger => {
                if let Some(tagger) = self.resolve_file_tagger(child)? {
                    level.file_taggers.push(tagger);
                }
            }
            ItemType::JobLimit => {
                self.resolve_job_limit(child, project_job_limits, false)?;
            }
            ItemType::Rule => {
                if let Some(rule) = self.resolve_rule(child, "")? {
                    level.rules.push(rule);
                }
            }
            ItemType::Probe
            | ItemType::PropertyOptions
            | ItemType::Properties
            | ItemType::PropertiesInSubProject => {}
            other => {
                debug!(item_type = %other, "ignoring unexpected project child");
            }
        }
        Ok(())
    }

    // Products

    fn resolve_product(&self, item: &Item, project_enabled: bool) -> Result<ResolvedProduct> {
        self.check_cancelation()?;
        self.evaluator.clear_property_dependencies();
        let mut product = ResolvedProduct {
            enabled: project_enabled,
            location: item.location(),
            ..ResolvedProduct::default()
        };
        let result = self.resolve_product_fully(item, &mut product);
        let delayed = self
            .load_result
            .product_infos
            .get(&item.id())
            .and_then(|info| info.delayed_error.clone());
        let error = match (result, delayed) {
            (Err(error), _) | (Ok(()), Some(error)) => Some(error),
            (Ok(()), None) => None,
        };
        if let Some(error) = error {
            if error.is_cancellation() {
                return Err(error);
            }
            let context = if product.name.is_empty() {
                "Error while handling product:".to_string()
            } else {
                format!("Error while handling product '{}':", product.name)
            };
            let full_error = error.prepended(context, item.location());
            if !product.enabled {
                debug!("{full_error}");
                return Ok(product);
            }
            if self.params.product_error_mode == ErrorHandlingMode::Strict {
                return Err(full_error);
            }
            warn!("{full_error}");
            warn!(
                "Product '{}' had errors and was disabled.",
                product.name
            );
            product.enabled = false;
        }
        Ok(product)
    }

    #[allow(clippy::too_many_lines)]
    fn resolve_product_fully(&self, item: &Item, product: &mut ResolvedProduct) -> Result<()> {
        product.name = self.evaluator.string_value(item, "name")?;
        product.build_directory = self.evaluator.string_value(item, "buildDirectory")?;
        product.multiplex_configuration_id = self
            .evaluator
            .string_value(item, "multiplexConfigurationId")?;
        debug!(product = %product.name, "resolveProduct");
        product.enabled = product.enabled && self.evaluator.bool_value(item, "condition")?;
        product.file_tags =
            FileTags::from_string_list(self.evaluator.string_list_value(item, "type")?);
        product.target_name = self.evaluator.string_value(item, "targetName")?;
        product.source_directory = self.evaluator.string_value(item, "sourceDirectory")?;
        let destination = self.evaluator.string_value(item, "destinationDirectory")?;
        product.destination_directory = if destination.is_empty() {
            product.build_directory.clone()
        } else {
            fileinfo::resolve_path(&product.build_directory, &destination)
        };
        if let Some(info) = self.load_result.product_infos.get(&item.id()) {
            product.probes = info.probes.iter().map(|p| (**p).clone()).collect();
        }

        {
            let _cache = EvalCacheEnabler::new(self.evaluator, product.source_directory.clone());
            product.module_properties = self.evaluate_module_values(item)?;
            product.product_properties =
                self.evaluate_item_properties(item, item, BTreeMap::new(), true, true)?;
        }
        product.product_properties.insert(
            "destinationDirectory".to_string(),
            Variant::string(product.destination_directory.clone()),
        );

        let mut children: Vec<Item> = Vec::new();
        let files_value = item
            .own_property("files")
            .filter(|value| !value.is_builtin_default());
        if let Some(files_value) = files_value {
            // Files assigned on the product itself belong to a synthetic
            // group.
            let fake_group = self.pool.create(ItemType::Group);
            fake_group.set_property_declarations(
                keel_ir::BuiltinDeclarations::new()
                    .declarations_for(ItemType::Group)
                    .to_vec(),
            );
            if let Some(file) = item.file() {
                fake_group.set_file(file);
            }
            fake_group.set_location(item.location());
            fake_group.set_scope(Some(item.id()));
            fake_group.set_variant_property("name", Variant::string(product.name.clone()));
            fake_group.set_property("files", files_value);
            if let Some(exclude) = item.own_property("excludeFiles") {
                fake_group.set_property("excludeFiles", exclude);
            }
            fake_group.set_variant_property("overrideTags", Variant::Bool(false));
            fake_group.set_modules(item.modules());
            fake_group.setup_builtin_defaults();
            children.push(fake_group);
        }
        children.extend(item.children().into_iter().map(|id| self.pool.get(id)));

        let info = self.load_result.product_infos.get(&item.id());
        let mut state = ProductState::default();
        for child in &children {
            match child.item_type() {
                ItemType::Group => {
                    self.resolve_group(child, item, product, &mut state, None, info)?;
                }
                ItemType::Rule => {
                    if let Some(rule) = self.resolve_rule(child, "")? {
                        product.rules.push(rule);
                    }
                }
                ItemType::FileTagger => {
                    if let Some(tagger) = self.resolve_file_tagger(child)? {
                        product.file_taggers.push(tagger);
                    }
                }
                ItemType::JobLimit => {
                    self.resolve_job_limit(child, &mut product.job_limits, false)?;
                }
                ItemType::Export => {
                    self.resolve_export(child, item, product)?;
                }
                ItemType::Depends
                | ItemType::Probe
                | ItemType::PropertyOptions
                | ItemType::Properties
                | ItemType::Parameter => {}
                other => {
                    debug!(item_type = %other, "ignoring unexpected product child");
                }
            }
        }

        self.resolve_modules(item, product)?;
        product.file_taggers.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.resolve_product_dependencies(item, product);
        Ok(())
    }

    fn resolve_modules(&self, item: &Item, product: &mut ResolvedProduct) -> Result<()> {
        let mut module_job_limits = JobLimits::default();
        for module in item.modules() {
            self.resolve_module(&module, product, &mut module_job_limits)?;
        }
        // Module limits only fill pools the product leaves unset.
        product.job_limits.fill_from(&module_job_limits);
        Ok(())
    }

    fn resolve_module(
        &self,
        module: &ItemModule,
        product: &mut ResolvedProduct,
        module_job_limits: &mut JobLimits,
    ) -> Result<()> {
        self.check_cancelation()?;
        let module_item = self.pool.get(module.item);
        if !module_item.is_present_module() {
            return Ok(());
        }
        let module_name = module.name.to_string();
        let mut resolved = ResolvedModule {
            name: module_name.clone(),
            is_product_dependency: module.product_item.is_some(),
            ..ResolvedModule::default()
        };
        resolved.setup_build_environment_script =
            self.script_function_value(&module_item, "setupBuildEnvironment");
        resolved.setup_run_environment_script =
            self.script_function_value(&module_item, "setupRunEnvironment");
        for dependency in module_item.modules() {
            if self.pool.get(dependency.item).is_present_module() {
                resolved.module_dependencies.push(dependency.name.to_string());
            }
        }
        if let Variant::Map(parameters) = &module.parameters {
            if !parameters.is_empty() {
                product
                    .module_parameters
                    .insert(module_name.clone(), module.parameters.clone());
            }
        }
        product.modules.push(resolved);

        // Rules, taggers, scanners and job limits declared by the module.
        let mut current = Some(module_item);
        let mut visited_children = FxHashSet::default();
        while let Some(node) = current {
            for child_id in node.children() {
                if !visited_children.insert(child_id) {
                    continue;
                }
                let child = self.pool.get(child_id);
                match child.item_type() {
                    ItemType::Rule => {
                        if let Some(rule) = self.resolve_rule(&child, &module_name)? {
                            product.rules.push(rule);
                        }
                    }
                    ItemType::FileTagger => {
                        if let Some(tagger) = self.resolve_file_tagger(&child)? {
                            product.file_taggers.push(tagger);
                        }
                    }
                    ItemType::JobLimit => {
                        self.resolve_job_limit(&child, module_job_limits, true)?;
                    }
                    ItemType::Scanner => {
                        if let Some(scanner) = self.resolve_scanner(&child, &module_name)? {
                            product.scanners.push(scanner);
                        }
                    }
                    _ => {}
                }
            }
            current = node.prototype().map(|id| self.pool.get(id));
        }
        Ok(())
    }

    fn resolve_product_dependencies(&self, item: &Item, product: &mut ResolvedProduct) {
        let mut dependencies: Vec<(String, Variant)> = Vec::new();
        for module in item.modules() {
            let Some(dependency_item) = module.product_item else {
                continue;
            };
            let dependency = self.pool.get(dependency_item);
            let unique_name = product_unique_name(&self.pool, &dependency);
            if dependencies.iter().any(|(name, _)| name == &unique_name) {
                continue;
            }
            dependencies.push((unique_name, module.parameters.clone()));
        }
        dependencies.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (name, parameters) in dependencies {
            if let Variant::Map(map) = &parameters {
                if !map.is_empty() {
                    product.dependency_parameters.insert(name.clone(), parameters);
                }
            }
            product.dependencies.push(name);
        }
    }

    // Groups

    #[allow(clippy::too_many_lines)]
    fn resolve_group(
        &self,
        item: &Item,
        product_item: &Item,
        product: &mut ResolvedProduct,
        state: &mut ProductState,
        parent: Option<&GroupContext>,
        info: Option<&ProductInfo>,
    ) -> Result<()> {
        self.check_cancelation()?;
        let parent_enabled = parent.map_or(product.enabled, |ctx| ctx.enabled);
        let is_enabled = parent_enabled && self.evaluator.bool_value(item, "condition")?;
        let result = self.resolve_group_fully(
            item,
            product_item,
            product,
            state,
            parent,
            info,
            is_enabled,
        );
        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                if !is_enabled {
                    debug!(location = %item.location(), "error resolving disabled group: {error}");
                    return Ok(());
                }
                if self.params.product_error_mode == ErrorHandlingMode::Strict {
                    return Err(error);
                }
                warn!("{error}");
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn resolve_group_fully(
        &self,
        item: &Item,
        product_item: &Item,
        product: &mut ResolvedProduct,
        state: &mut ProductState,
        parent: Option<&GroupContext>,
        info: Option<&ProductInfo>,
        is_enabled: bool,
    ) -> Result<()> {
        let base_properties = parent.map_or_else(
            || product.module_properties.clone(),
            |ctx| ctx.properties.clone(),
        );
        let group_properties = match info.and_then(|info| {
            info.module_properties_set_in_groups.get(&item.id())
        }) {
            Some(overridden) => {
                self.resolve_additional_module_properties(
                    item,
                    &base_properties,
                    overridden,
                    &product.source_directory,
                )?
            }
            None => base_properties.clone(),
        };

        let mut files = self.evaluator.string_list_value(item, "files")?;
        let file_tags_set = self.evaluator.property_was_set(item, "fileTags");
        let mut file_tags = self.evaluator.file_tags_value(item, "fileTags")?;
        let file_tags_filter = self.evaluator.string_list_value(item, "fileTagsFilter")?;
        if !file_tags_filter.is_empty() {
            if !files.is_empty() {
                return Err(ErrorInfo::resolve(
                    "Group.files and Group.fileTagsFilter are exclusive.",
                    item.location(),
                ));
            }
            if !is_enabled {
                return Ok(());
            }
            let file_path = item
                .file()
                .map(|f| f.file_path.clone())
                .unwrap_or_default();
            if let Some((index, locations)) =
                state.artifact_properties_per_filter.get_mut(&file_tags_filter)
            {
                if locations.iter().any(|existing| existing == &file_path) {
                    let mut error =
                        ErrorInfo::resolve("Conflicting fileTagsFilter in Group items.", CodeLocation::unknown());
                    error.append("First item", CodeLocation::file_only(locations[0].clone()));
                    error.append("Second item", item.location());
                    return Err(error);
                }
                locations.push(file_path);
                let existing = &mut product.artifact_properties[*index];
                existing.property_map = group_properties;
                existing.extra_file_tags.unite(&file_tags);
                return Ok(());
            }
            let properties = ArtifactProperties {
                file_tags_filter: FileTags::from_string_list(file_tags_filter.clone()),
                property_map: group_properties,
                extra_file_tags: file_tags,
            };
            product.artifact_properties.push(properties);
            state.artifact_properties_per_filter.insert(
                file_tags_filter,
                (product.artifact_properties.len() - 1, vec![file_path]),
            );
            return Ok(());
        }

        let mut patterns = Vec::new();
        let mut idx = 0;
        while idx < files.len() {
            if fileinfo::is_pattern(&files[idx]) {
                patterns.push(files.remove(idx));
            } else {
                idx += 1;
            }
        }

        let (prefix_value, prefix_was_set) = {
            let value = self.evaluator.string_value(item, "prefix")?;
            (value, self.evaluator.property_was_set(item, "prefix"))
        };
        let prefix = if prefix_was_set {
            prefix_value
        } else {
            parent.map_or(prefix_value, |ctx| ctx.prefix.clone())
        };
        if !prefix.is_empty() {
            for file in &mut files {
                *file = format!("{prefix}{file}");
            }
        }

        let override_tags = self.evaluator.bool_value(item, "overrideTags")?;
        if override_tags && file_tags_set {
            if file_tags.is_empty() {
                file_tags.insert(FileTag::unknown_file_tag());
            }
        } else if let Some(ctx) = parent {
            file_tags.unite(&ctx.file_tags);
        }

        let target_of_module = item
            .variant_property(&self.pool, "targetOfModule")
            .map(|v| v.value.to_display_string())
            .unwrap_or_default();

        let mut group = ResolvedGroup {
            name: self.evaluator.string_value(item, "name")?,
            enabled: is_enabled,
            location: item.location(),
            prefix,
            file_tags,
            override_tags,
            properties: group_properties,
            target_of_module,
            ..ResolvedGroup::default()
        };
        if group.name.is_empty() {
            group.name = format!("Group {}", product.groups.len());
        }

        let files_location = item
            .own_property("files")
            .map_or_else(|| item.location(), |value| value.location());
        let base_dir = item
            .file()
            .map(|f| f.dir_path.clone())
            .unwrap_or_default();
        let mut file_error = ErrorInfo::empty();

        if !patterns.is_empty() {
            let exclude_patterns = self.evaluator.string_list_value(item, "excludeFiles")?;
            let expanded = expand_wildcards(&base_dir, &patterns, &exclude_patterns);
            let mut wildcards = SourceWildcards {
                patterns,
                exclude_patterns,
                files: Vec::new(),
            };
            for file_name in expanded {
                self.create_source_artifact(
                    product,
                    &mut wildcards.files,
                    &group,
                    &base_dir,
                    &file_name,
                    true,
                    &files_location,
                    state,
                    &mut file_error,
                );
            }
            group.wildcards = Some(wildcards);
        }

        let mut group_files = Vec::new();
        for file_name in &files {
            self.create_source_artifact(
                product,
                &mut group_files,
                &group,
                &base_dir,
                file_name,
                false,
                &files_location,
                state,
                &mut file_error,
            );
        }
        group.files = group_files;

        if file_error.has_error() {
            if group.enabled {
                if self.params.product_error_mode == ErrorHandlingMode::Strict {
                    return Err(file_error);
                }
                warn!("{file_error}");
            } else {
                debug!("error for disabled group: {file_error}");
            }
        }

        let context = GroupContext {
            enabled: group.enabled,
            prefix: group.prefix.clone(),
            file_tags: group.file_tags.clone(),
            properties: group.properties.clone(),
        };
        product.groups.push(group);

        for child_id in item.children() {
            let child = self.pool.get(child_id);
            if child.item_type() == ItemType::Group {
                self.resolve_group(&child, product_item, product, state, Some(&context), info)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_source_artifact(
        &self,
        product: &mut ResolvedProduct,
        target: &mut Vec<SourceArtifact>,
        group: &ResolvedGroup,
        base_dir: &str,
        file_name: &str,
        wildcard: bool,
        files_location: &CodeLocation,
        state: &mut ProductState,
        error: &mut ErrorInfo,
    ) {
        let absolute_path = fileinfo::clean_path(&fileinfo::resolve_path(base_dir, file_name));
        if !wildcard && !std::path::Path::new(&absolute_path).exists() {
            error.append(
                format!("File '{absolute_path}' does not exist."),
                files_location.clone(),
            );
            product.missing_source_files.push(absolute_path);
            return;
        }
        if group.enabled {
            let key = (group.target_of_module.clone(), absolute_path.clone());
            if let Some(first) = state.source_artifact_locations.get(&key) {
                error.append(
                    format!("Duplicate source file '{absolute_path}'."),
                    CodeLocation::unknown(),
                );
                error.append("First occurrence is here.", first.clone());
                error.append("Next occurrence is here.", files_location.clone());
                return;
            }
            state
                .source_artifact_locations
                .insert(key, files_location.clone());
        }
        target.push(SourceArtifact {
            absolute_file_path: absolute_path,
            file_tags: group.file_tags.clone(),
            override_file_tags: group.override_tags,
            target_of_module: group.target_of_module.clone(),
            properties: group.properties.clone(),
        });
    }

    /// Re-evaluates, in the group's context, every module property that a
    /// group override influences (directly or through the recorded
    /// dependency edges).
    fn resolve_additional_module_properties(
        &self,
        group_item: &Item,
        current: &BTreeMap<String, Variant>,
        overridden: &QualifiedIdSet,
        source_directory: &str,
    ) -> Result<BTreeMap<String, Variant>> {
        // Reverse the recorded reader -> readee edges so overriding a
        // property finds its dependents.
        let dependencies = self.evaluator.property_dependencies();
        let mut dependents: FxHashMap<QualifiedId, QualifiedIdSet> = FxHashMap::default();
        for (reader, readees) in &dependencies {
            for readee in readees {
                dependents
                    .entry(readee.clone())
                    .or_default()
                    .insert(reader.clone());
            }
        }
        let mut to_evaluate = QualifiedIdSet::new();
        let mut queue: Vec<QualifiedId> = overridden.iter().cloned().collect();
        while let Some(id) = queue.pop() {
            if !to_evaluate.insert(id.clone()) {
                continue;
            }
            if let Some(readers) = dependents.get(&id) {
                queue.extend(readers.iter().cloned());
            }
        }

        let mut props_per_module: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for full_name in &to_evaluate {
            let module = full_name.parent().to_string();
            if let Some(property) = full_name.last() {
                props_per_module
                    .entry(module)
                    .or_default()
                    .push(property.to_string());
            }
        }

        let mut result = current.clone();
        let _cache = EvalCacheEnabler::new(self.evaluator, source_directory);
        for module in group_item.modules() {
            let module_name = module.name.to_string();
            let Some(props) = props_per_module.remove(&module_name) else {
                continue;
            };
            let module_item = self.pool.get(module.item);
            let mut reusable = result
                .get(&module_name)
                .and_then(Variant::as_map)
                .cloned()
                .unwrap_or_default();
            for prop in &props {
                reusable.remove(prop);
            }
            let evaluated =
                self.evaluate_item_properties(&module_item, &module_item, reusable, true, true)?;
            result.insert(module_name, Variant::Map(evaluated));
        }
        Ok(result)
    }

    // Rules, taggers, job limits, scanners

    #[allow(clippy::too_many_lines)]
    fn resolve_rule(&self, item: &Item, module_name: &str) -> Result<Option<Rule>> {
        self.check_cancelation()?;
        if !self.evaluator.bool_value(item, "condition")? {
            return Ok(None);
        }
        let mut rule = Rule {
            module_name: module_name.to_string(),
            ..Rule::default()
        };

        let mut has_artifact_children = false;
        for child_id in item.children() {
            let child = self.pool.get(child_id);
            if child.item_type() != ItemType::Artifact {
                return Err(ErrorInfo::resolve(
                    "'Rule' can only have children of type 'Artifact'.",
                    child.location(),
                ));
            }
            has_artifact_children = true;
            rule.artifacts.push(self.resolve_rule_artifact(&child)?);
        }

        rule.name = self.evaluator.string_value(item, "name")?;
        rule.prepare_script = self
            .script_function_value(item, "prepare")
            .unwrap_or_default();
        rule.output_artifacts_script = self
            .script_function_value(item, "outputArtifacts")
            .unwrap_or_default();
        rule.output_file_tags = self.evaluator.file_tags_value(item, "outputFileTags")?;
        if rule.output_artifacts_script.is_valid() && has_artifact_children {
            return Err(ErrorInfo::resolve(
                "The Rule.outputArtifacts script is not allowed in rules that contain Artifact items.",
                item.location(),
            ));
        }
        if !has_artifact_children && rule.output_file_tags.is_empty() {
            return Err(ErrorInfo::resolve(
                "A rule needs to have Artifact items or a non-empty outputFileTags property.",
                item.location(),
            ));
        }
        rule.multiplex = self.evaluator.bool_value(item, "multiplex")?;
        rule.always_run = self.evaluator.bool_value(item, "alwaysRun")?;
        rule.inputs = self.evaluator.file_tags_value(item, "inputs")?;
        rule.inputs_from_dependencies = self
            .evaluator
            .file_tags_value(item, "inputsFromDependencies")?;
        let requires_inputs_set = self.evaluator.property_was_set(item, "requiresInputs");
        rule.requires_inputs = if requires_inputs_set {
            self.evaluator.bool_value(item, "requiresInputs")?
        } else {
            rule.declares_inputs()
        };
        rule.auxiliary_inputs = self.evaluator.file_tags_value(item, "auxiliaryInputs")?;
        rule.excluded_inputs = self.evaluator.file_tags_value(item, "excludedInputs")?;
        if rule.excluded_inputs.is_empty() {
            rule.excluded_inputs = self
                .evaluator
                .file_tags_value(item, "excludedAuxiliaryInputs")?;
        }
        rule.explicitly_depends_on =
            self.evaluator.file_tags_value(item, "explicitlyDependsOn")?;
        rule.explicitly_depends_on_from_dependencies = self
            .evaluator
            .file_tags_value(item, "explicitlyDependsOnFromDependencies")?;
        if !rule.multiplex && !rule.declares_inputs() {
            return Err(ErrorInfo::resolve(
                "Rule has no inputs, but is not a multiplex rule.",
                item.location(),
            ));
        }
        if !rule.multiplex && !rule.requires_inputs {
            return Err(ErrorInfo::resolve(
                "Rule.requiresInputs is false for non-multiplex rule.",
                item.location(),
            ));
        }
        if !rule.declares_inputs() && rule.requires_inputs {
            return Err(ErrorInfo::resolve(
                "Rule.requiresInputs is true, but the rule does not declare any input tags.",
                item.location(),
            ));
        }
        Ok(Some(rule))
    }

    fn resolve_rule_artifact(&self, item: &Item) -> Result<RuleArtifact> {
        let mut artifact = RuleArtifact {
            location: item.location(),
            ..RuleArtifact::default()
        };
        if let Some(value) = item.source_property(&self.pool, "filePath") {
            artifact.file_path_location = value.location();
            if let Some(source) = value.as_js_source() {
                artifact.file_path = source.source_code().to_string();
            }
        }
        artifact.file_tags = self.evaluator.file_tags_value(item, "fileTags")?;
        artifact.always_updated = self.evaluator.bool_value(item, "alwaysUpdated")?;

        // Nested `module.property: value` assignments become bindings,
        // evaluated per invocation at build time.
        let mut seen = QualifiedIdSet::new();
        let mut current = Some(item.clone());
        while let Some(node) = current {
            for (name, value) in node.properties() {
                if let Some(nested) = value.as_item() {
                    self.resolve_rule_artifact_binding(
                        &mut artifact,
                        &self.pool.get(nested),
                        &QualifiedId::from_segments([name]),
                        &mut seen,
                    );
                }
            }
            current = node.prototype().map(|id| self.pool.get(id));
        }
        Ok(artifact)
    }

    fn resolve_rule_artifact_binding(
        &self,
        artifact: &mut RuleArtifact,
        item: &Item,
        prefix: &QualifiedId,
        seen: &mut QualifiedIdSet,
    ) {
        for (name, value) in item.properties() {
            let binding_name = prefix.appended(name.clone());
            match &*value {
                Value::Item(nested) => {
                    self.resolve_rule_artifact_binding(
                        artifact,
                        &self.pool.get(*nested),
                        &binding_name,
                        seen,
                    );
                }
                Value::JsSource(source) => {
                    if !seen.insert(binding_name.clone()) {
                        continue;
                    }
                    artifact.bindings.push(RuleArtifactBinding {
                        name: binding_name.segments().to_vec(),
                        code: source.source_code().to_string(),
                        location: source.location.clone(),
                    });
                }
                Value::Variant(_) => {}
            }
        }
    }

    fn resolve_file_tagger(&self, item: &Item) -> Result<Option<FileTagger>> {
        self.check_cancelation()?;
        if !self.evaluator.bool_value(item, "condition")? {
            return Ok(None);
        }
        let patterns = self.evaluator.string_list_value(item, "patterns")?;
        if patterns.is_empty() {
            return Err(ErrorInfo::resolve(
                "FileTagger.patterns must be a non-empty list.",
                item.location(),
            ));
        }
        if patterns.iter().any(String::is_empty) {
            return Err(ErrorInfo::resolve(
                "A FileTagger pattern must not be empty.",
                item.location(),
            ));
        }
        let file_tags = self.evaluator.file_tags_value(item, "fileTags")?;
        if file_tags.is_empty() {
            return Err(ErrorInfo::resolve(
                "FileTagger.fileTags must not be empty.",
                item.location(),
            ));
        }
        let priority = self.evaluator.int_value(item, "priority", 0)?;
        Ok(Some(FileTagger {
            patterns,
            file_tags,
            priority,
        }))
    }

    fn resolve_job_limit(
        &self,
        item: &Item,
        limits: &mut JobLimits,
        stricter_only: bool,
    ) -> Result<()> {
        if !self.evaluator.bool_value(item, "condition")? {
            return Ok(());
        }
        let pool_name = self.evaluator.string_value(item, "jobPool")?;
        if pool_name.is_empty() {
            return Err(ErrorInfo::resolve(
                "A JobLimit item needs to have a non-empty 'jobPool' property.",
                item.location(),
            ));
        }
        if !self.evaluator.property_was_set(item, "jobCount") {
            return Err(ErrorInfo::resolve(
                "A JobLimit item needs to have a 'jobCount' property.",
                item.location(),
            ));
        }
        let count = self.evaluator.int_value(item, "jobCount", -1)?;
        if count < 0 {
            return Err(ErrorInfo::resolve(
                "A JobLimit item must have a non-negative 'jobCount' property.",
                item.location(),
            ));
        }
        if stricter_only {
            limits.set_stricter_limit(&pool_name, count);
        } else {
            limits.set_limit(pool_name, count);
        }
        Ok(())
    }

    fn resolve_scanner(&self, item: &Item, module_name: &str) -> Result<Option<ResolvedScanner>> {
        self.check_cancelation()?;
        if !self.evaluator.bool_value(item, "condition")? {
            debug!("scanner condition is false");
            return Ok(None);
        }
        Ok(Some(ResolvedScanner {
            module_name: module_name.to_string(),
            inputs: self.evaluator.file_tags_value(item, "inputs")?,
            recursive: self.evaluator.bool_value(item, "recursive")?,
            search_paths_script: self
                .script_function_value(item, "searchPaths")
                .unwrap_or_default(),
            scan_script: self.script_function_value(item, "scan").unwrap_or_default(),
        }))
    }

    // Exports

    #[allow(clippy::too_many_lines)]
    fn resolve_export(
        &self,
        export_item: &Item,
        product_item: &Item,
        product: &mut ResolvedProduct,
    ) -> Result<()> {
        let module = &mut product.exported_module;
        setup_exported_properties(&self.pool, export_item, "", &mut module.properties);
        module.properties.sort_by(exported_property_order);

        // Evaluate the exported values in the exporting product's context.
        export_item.set_scope(Some(product_item.id()));
        for (name, value) in export_item.properties() {
            if name == "prefixMapping" {
                continue;
            }
            match &*value {
                Value::Item(nested) => {
                    self.collect_exported_module_values(
                        &self.pool.get(*nested),
                        &QualifiedId::from_segments([name]),
                        &mut module.module_property_values,
                    )?;
                }
                _ => {
                    let (variant, _) = self.evaluator.evaluate_value(export_item, &name, &value)?;
                    module.property_values.insert(name, variant);
                }
            }
        }

        for child_id in export_item.children() {
            let child = self.pool.get(child_id);
            if matches!(child.item_type(), ItemType::Depends | ItemType::Probe) {
                continue;
            }
            module
                .children
                .push(self.resolve_export_child(&child));
        }

        // Modules the export depends on; product dependencies arrive as
        // modules with a product marker.
        for dependency in export_item.modules() {
            let dependency_item = self.pool.get(dependency.item);
            if !dependency_item.is_present_module() {
                continue;
            }
            if let Some(dependency_product) = dependency.product_item {
                let unique = product_unique_name(&self.pool, &self.pool.get(dependency_product));
                if !module.product_dependencies.contains(&unique) {
                    module.product_dependencies.push(unique.clone());
                }
                if let Variant::Map(map) = &dependency.parameters {
                    if !map.is_empty() {
                        module
                            .dependency_parameters
                            .insert(unique, dependency.parameters.clone());
                    }
                }
                continue;
            }
            let name = dependency.name.to_string();
            if name == BASE_MODULE_NAME
                || module.module_dependencies.iter().any(|d| d.name == name)
            {
                continue;
            }
            module.module_dependencies.push(ExportedModuleDependency {
                name,
                module_properties: BTreeMap::new(),
            });
        }
        module.product_dependencies.sort();

        self.adapt_exported_property_values(export_item, product_item, module)?;
        self.collect_export_import_statements(export_item, module);
        Ok(())
    }

    fn collect_exported_module_values(
        &self,
        item: &Item,
        prefix: &QualifiedId,
        values: &mut BTreeMap<String, Variant>,
    ) -> Result<()> {
        for (name, value) in item.properties() {
            if item
                .property_declaration(&self.pool, &name)
                .is_some_and(|decl| decl.flags.not_available_in_config)
            {
                continue;
            }
            match &*value {
                Value::Item(nested) => {
                    self.collect_exported_module_values(
                        &self.pool.get(*nested),
                        &prefix.appended(name),
                        values,
                    )?;
                }
                _ => {
                    let (variant, _) = self.evaluator.evaluate_value(item, &name, &value)?;
                    values.insert(prefix.appended(name).to_string(), variant);
                }
            }
        }
        Ok(())
    }

    fn resolve_export_child(&self, item: &Item) -> ExportedItem {
        let mut exported = ExportedItem {
            name: item.type_name(),
            ..ExportedItem::default()
        };
        setup_exported_properties(&self.pool, item, "", &mut exported.properties);
        for child_id in item.children() {
            exported
                .children
                .push(self.resolve_export_child(&self.pool.get(child_id)));
        }
        exported
    }

    fn adapt_exported_property_values(
        &self,
        export_item: &Item,
        product_item: &Item,
        module: &mut ExportedModule,
    ) -> Result<()> {
        let prefix_list = self.evaluator.value(export_item, "prefixMapping")?;
        let Variant::List(entries) = prefix_list else {
            return Ok(());
        };
        let mut mapping: Vec<(String, String)> = Vec::new();
        for entry in entries {
            let prefix = entry.map_value("prefix").to_display_string();
            let replacement = entry.map_value("replacement").to_display_string();
            if !prefix.is_empty() {
                mapping.push((prefix, replacement));
            }
        }
        if mapping.is_empty() {
            return Ok(());
        }
        let product_name = self
            .evaluator
            .string_value(product_item, "name")?
            .to_lowercase();
        let build_dir = self.evaluator.string_value(product_item, "buildDirectory")?;
        let refers_to_product = |value: &str| {
            (!product_name.is_empty() && value.to_lowercase().contains(&product_name))
                || (!build_dir.is_empty() && value.contains(&build_dir))
        };
        let map_string = |value: &str| -> String {
            for (prefix, replacement) in &mapping {
                if value.starts_with(prefix.as_str()) {
                    return format!("{replacement}{}", &value[prefix.len()..]);
                }
            }
            value.to_string()
        };
        let map_variant = |value: &Variant| -> Variant {
            match value {
                Variant::String(s) => Variant::String(map_string(s)),
                Variant::List(items) => Variant::List(
                    items
                        .iter()
                        .filter(|item| {
                            item.as_str().map_or(true, |s| !refers_to_product(s))
                        })
                        .map(|item| match item {
                            Variant::String(s) => Variant::String(map_string(s)),
                            other => other.clone(),
                        })
                        .collect(),
                ),
                other => other.clone(),
            }
        };
        for value in module.property_values.values_mut() {
            *value = map_variant(value);
        }
        for value in module.module_property_values.values_mut() {
            *value = map_variant(value);
        }
        Ok(())
    }

    fn collect_export_import_statements(&self, export_item: &Item, module: &mut ExportedModule) {
        let Some(file) = export_item.file() else {
            return;
        };
        for import in &file.js_imports {
            if exported_module_uses_import(module, &import.scope_name) {
                if let Some(line) = file.line_at(import.location.line) {
                    module.import_statements.push(line.trim().to_string());
                }
            }
        }
        for name in keel_js::extension_names() {
            if exported_module_uses_import(module, name) {
                module
                    .import_statements
                    .push(format!("import keel.{name}"));
            }
        }
        module.import_statements.sort();
        module.import_statements.dedup();
    }

    // Property evaluation into maps

    fn evaluate_module_values(&self, item: &Item) -> Result<BTreeMap<String, Variant>> {
        let mut values = BTreeMap::new();
        for module in item.modules() {
            let module_item = self.pool.get(module.item);
            if !module_item.is_present_module() {
                continue;
            }
            let map = self.evaluate_item_properties(
                &module_item,
                &module_item,
                BTreeMap::new(),
                true,
                true,
            )?;
            values.insert(module.name.to_string(), Variant::Map(map));
        }
        Ok(values)
    }

    /// Evaluates a container's properties into a map. Keys already present
    /// in the template win (nearer definitions shadow prototype values).
    fn evaluate_item_properties(
        &self,
        item: &Item,
        container: &Item,
        template: BTreeMap<String, Variant>,
        lookup_prototype: bool,
        check_errors: bool,
    ) -> Result<BTreeMap<String, Variant>> {
        let mut result = template;
        for (name, value) in container.properties() {
            self.check_cancelation()?;
            if value.as_item().is_some() {
                // Module instances; handled by evaluate_module_values.
                continue;
            }
            if result.contains_key(&name) {
                continue;
            }
            let decl = item.property_declaration(&self.pool, &name).unwrap_or_default();
            if decl.flags.not_available_in_config {
                continue;
            }
            let evaluated = match self.evaluator.evaluate_value(item, &name, &value) {
                Ok((variant, _)) => variant,
                Err(error) => {
                    if check_errors {
                        return Err(error);
                    }
                    debug!("ignoring evaluation error in disabled context: {error}");
                    continue;
                }
            };
            let converted = self.evaluator.convert_to_declared_type(&decl, &evaluated);
            self.check_allowed_values(&converted, &value.location(), &decl, &name)?;
            result.insert(name, converted);
        }
        match (lookup_prototype, container.prototype()) {
            (true, Some(prototype)) => self.evaluate_item_properties(
                item,
                &self.pool.get(prototype),
                result,
                true,
                check_errors,
            ),
            _ => Ok(result),
        }
    }

    fn check_allowed_values(
        &self,
        value: &Variant,
        location: &CodeLocation,
        decl: &keel_ir::PropertyDeclaration,
        key: &str,
    ) -> Result<()> {
        if decl.allowed_values.is_empty() {
            return Ok(());
        }
        let candidates: Vec<String> = match value {
            Variant::String(s) => vec![s.clone()],
            Variant::List(_) => value.to_string_list(),
            _ => return Ok(()),
        };
        for candidate in candidates {
            if !decl.allowed_values.contains(&candidate) {
                let error = ErrorInfo::resolve(
                    format!("Value '{candidate}' is not allowed for property '{key}'."),
                    location.clone(),
                );
                match self.params.property_checking_mode {
                    ErrorHandlingMode::Strict => return Err(error),
                    ErrorHandlingMode::Relaxed => warn!("{error}"),
                }
            }
        }
        Ok(())
    }

    fn script_function_value(&self, item: &Item, name: &str) -> Option<ScriptFunction> {
        let value = item.source_property(&self.pool, name)?;
        let source = value.as_js_source()?;
        if source.is_builtin_default {
            return None;
        }
        let declaration = item.property_declaration(&self.pool, name).unwrap_or_default();
        Some(ScriptFunction {
            source_code: source.source_code_as_function(&declaration.function_argument_names),
            location: source.location.clone(),
        })
    }

    fn check_for_duplicate_product_names(&self, top: &TopLevelProject) -> Result<()> {
        let all = top.all_products();
        for (index, first) in all.iter().enumerate() {
            for second in &all[index + 1..] {
                if first.unique_name() == second.unique_name() {
                    let mut error = ErrorInfo::resolve(
                        format!("Duplicate product name '{}'.", first.name),
                        CodeLocation::unknown(),
                    );
                    error.append("First product defined here.", first.location.clone());
                    error.append("Second product defined here.", second.location.clone());
                    return Err(error);
                }
            }
        }
        Ok(())
    }
}

// Free helpers

fn product_unique_name(pool: &ItemPool, product_item: &Item) -> String {
    let name = product_item
        .variant_property(pool, "name")
        .map(|v| v.value.to_display_string())
        .unwrap_or_default();
    let multiplex_id = product_item
        .variant_property(pool, "multiplexConfigurationId")
        .map(|v| v.value.to_display_string())
        .unwrap_or_default();
    if multiplex_id.is_empty() {
        name
    } else {
        format!("{name}@{multiplex_id}")
    }
}

fn make_sub_project_names_unique(project: &mut ResolvedProject) {
    let mut seen: FxHashSet<String> = FxHashSet::default();
    for sub in &mut project.sub_projects {
        while !seen.insert(sub.name.clone()) {
            sub.name.push('_');
        }
        make_sub_project_names_unique(sub);
    }
}

/// Applies the taggers to every enabled artifact; files no tagger matches
/// keep the sentinel tag. A truthy base-module `install` adds the
/// `installable` tag.
fn apply_file_taggers(product: &mut ResolvedProduct) {
    let taggers_view = product.clone();
    let install = product.base_module_property("install").to_bool();
    for group in &mut product.groups {
        if !group.enabled {
            continue;
        }
        let artifacts = group
            .files
            .iter_mut()
            .chain(group.wildcards.iter_mut().flat_map(|w| w.files.iter_mut()));
        for artifact in artifacts {
            if !artifact.override_file_tags || artifact.file_tags.is_empty() {
                let file_name = fileinfo::file_name(&artifact.absolute_file_path);
                let tags = taggers_view.file_tags_for_file_name(file_name);
                artifact.file_tags.unite(&tags);
                if artifact.file_tags.is_empty() {
                    artifact.file_tags.insert(FileTag::unknown_file_tag());
                }
                debug!(
                    file = file_name,
                    tags = %artifact.file_tags,
                    "applied file tags"
                );
            }
            let artifact_install = artifact
                .properties
                .get(BASE_MODULE_NAME)
                .map_or(install, |map| {
                    let value = map.map_value("install");
                    if value.is_undefined() {
                        install
                    } else {
                        value.to_bool()
                    }
                });
            if artifact_install {
                artifact.file_tags.insert(FileTag::new("installable"));
            }
        }
    }
}

/// Attaches `fileTagsFilter` property maps to matching artifacts.
fn match_artifact_properties(product: &mut ResolvedProduct) {
    let artifact_properties = product.artifact_properties.clone();
    for group in &mut product.groups {
        if !group.enabled {
            continue;
        }
        let artifacts = group
            .files
            .iter_mut()
            .chain(group.wildcards.iter_mut().flat_map(|w| w.files.iter_mut()));
        for artifact in artifacts {
            if !artifact.target_of_module.is_empty() {
                continue;
            }
            for properties in &artifact_properties {
                if artifact.file_tags.intersects(&properties.file_tags_filter) {
                    artifact.properties = properties.property_map.clone();
                }
            }
        }
    }
}

fn setup_exported_properties(
    pool: &ItemPool,
    item: &Item,
    name_prefix: &str,
    properties: &mut Vec<ExportedProperty>,
) {
    let builtin_names: Vec<String> = keel_ir::BuiltinDeclarations::new()
        .declarations_for(item.item_type())
        .iter()
        .map(|decl| decl.name.clone())
        .collect();
    for (name, value) in item.properties() {
        let qualified = if name_prefix.is_empty() {
            name.clone()
        } else {
            format!("{name_prefix}.{name}")
        };
        if (item.item_type() == ItemType::Export || item.item_type() == ItemType::Properties)
            && qualified == "prefixMapping"
        {
            continue;
        }
        if item
            .property_declaration(pool, &name)
            .is_some_and(|decl| decl.flags.not_available_in_config)
        {
            continue;
        }
        match &*value {
            Value::Item(nested) => {
                setup_exported_properties(pool, &pool.get(*nested), &qualified, properties);
            }
            Value::Variant(variant) => {
                if value.is_builtin_default() {
                    continue;
                }
                properties.push(ExportedProperty {
                    full_name: qualified,
                    source_code: variant.value.to_literal(),
                    is_builtin: builtin_names.contains(&name),
                });
            }
            Value::JsSource(source) => {
                if source.is_builtin_default {
                    continue;
                }
                properties.push(ExportedProperty {
                    full_name: qualified,
                    source_code: source.source_code().to_string(),
                    is_builtin: builtin_names.contains(&name),
                });
            }
        }
    }
}

/// Order for the exported property list: builtins first, then by component
/// count, then lexicographically, so the output does not look random.
fn exported_property_order(a: &ExportedProperty, b: &ExportedProperty) -> std::cmp::Ordering {
    b.is_builtin
        .cmp(&a.is_builtin)
        .then_with(|| {
            a.full_name
                .matches('.')
                .count()
                .cmp(&b.full_name.matches('.').count())
        })
        .then_with(|| a.full_name.cmp(&b.full_name))
}

fn exported_property_uses_import(property: &ExportedProperty, name: &str) -> bool {
    contains_word(&property.source_code, name)
}

fn exported_item_uses_import(item: &ExportedItem, name: &str) -> bool {
    item.properties
        .iter()
        .any(|p| exported_property_uses_import(p, name))
        || item.children.iter().any(|c| exported_item_uses_import(c, name))
}

fn exported_module_uses_import(module: &ExportedModule, name: &str) -> bool {
    module
        .properties
        .iter()
        .any(|p| exported_property_uses_import(p, name))
        || module.children.iter().any(|c| exported_item_uses_import(c, name))
}

/// Word-boundary containment check (`FileInfo` matches `FileInfo.joinPaths`
/// but not `MyFileInfo`).
fn contains_word(haystack: &str, word: &str) -> bool {
    let mut start = 0;
    while let Some(found) = haystack[start..].find(word) {
        let begin = start + found;
        let end = begin + word.len();
        let before_ok = begin == 0
            || !haystack[..begin]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        let after_ok = end >= haystack.len()
            || !haystack[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}

/// Expands wildcard patterns relative to a base directory, applying
/// exclude patterns to the results.
fn expand_wildcards(base_dir: &str, patterns: &[String], exclude_patterns: &[String]) -> Vec<String> {
    let mut result = Vec::new();
    for pattern in patterns {
        let components: Vec<&str> = pattern.split('/').collect();
        expand_pattern_components(base_dir, &components, String::new(), &mut result);
    }
    result.retain(|relative| {
        let file_name = fileinfo::file_name(relative);
        !exclude_patterns.iter().any(|exclude| {
            fileinfo::matches_pattern(exclude, file_name)
                || fileinfo::matches_pattern(exclude, relative)
        })
    });
    result.sort();
    result.dedup();
    result
}

fn expand_pattern_components(
    current_dir: &str,
    components: &[&str],
    relative_prefix: String,
    result: &mut Vec<String>,
) {
    let Some((component, rest)) = components.split_first() else {
        return;
    };
    let Ok(entries) = std::fs::read_dir(current_dir) else {
        return;
    };
    let mut names: Vec<(String, bool)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            (entry.file_name().to_string_lossy().to_string(), is_dir)
        })
        .collect();
    names.sort();

    if *component == "**" {
        // `**` matches zero or more directory levels.
        expand_pattern_components(current_dir, rest, relative_prefix.clone(), result);
        for (name, is_dir) in &names {
            if *is_dir {
                expand_pattern_components(
                    &format!("{current_dir}/{name}"),
                    components,
                    join_relative(&relative_prefix, name),
                    result,
                );
            }
        }
        return;
    }

    for (name, is_dir) in &names {
        if !fileinfo::matches_pattern(component, name) {
            continue;
        }
        let relative = join_relative(&relative_prefix, name);
        if rest.is_empty() {
            if !is_dir {
                result.push(relative);
            }
        } else if *is_dir {
            expand_pattern_components(&format!("{current_dir}/{name}"), rest, relative, result);
        }
    }
}

fn join_relative(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
