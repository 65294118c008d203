//! Lazy property evaluation against the scope chain.
//!
//! Scope order for a property on item `I` from file `F`:
//! 1. `I` itself (own properties and prototypes);
//! 2. `I`'s scope chain (enclosing product/project items, which also hold
//!    the module instances);
//! 3. `F`'s import scope (extension and script imports);
//! 4. `F`'s file scope (`filePath`, `path`) plus the structural bindings
//!    `product` and `project`.
//!
//! Expressions are pre-bound: the free identifier paths of the source are
//! resolved through the chain above into one scope object, so the engine
//! never needs implicit name resolution. `base`, `outer` and `original`
//! are bound from the value chain when referenced.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use keel_diagnostic::{ErrorInfo, Result};
use keel_ir::{
    convert_to_property_type, CodeLocation, FileContextPtr, FileTags, Item, ItemId, ItemPool,
    ItemType, JsSourceValue, PropertyDeclaration, QualifiedId, QualifiedIdSet, Value, ValuePtr,
    Variant,
};
use keel_js::{extension_object, free_paths, JsError, JsValue, ScriptEngine};

use crate::script_importer::ScriptImporter;

pub type SharedEngine = Rc<RefCell<ScriptEngine>>;

#[derive(Clone)]
struct CacheEntry {
    value: Variant,
    generation: u64,
}

/// Evaluates property values lazily, with memoization and dependency
/// recording.
pub struct Evaluator {
    pool: Rc<ItemPool>,
    engine: SharedEngine,
    importer: ScriptImporter,
    caching_enabled: Cell<bool>,
    path_properties_base_dir: RefCell<String>,
    cache: RefCell<FxHashMap<(ItemId, String), CacheEntry>>,
    /// Items whose cache entries must be dropped; filled under a mutex so
    /// invalidation can be requested from threads reading the same item.
    invalidated: Mutex<FxHashSet<ItemId>>,
    free_path_cache: RefCell<FxHashMap<String, Rc<Vec<Vec<String>>>>>,
    property_dependencies: RefCell<FxHashMap<QualifiedId, QualifiedIdSet>>,
    requested_properties: RefCell<Vec<QualifiedId>>,
    eval_stack: RefCell<Vec<(ItemId, String)>>,
}

impl Evaluator {
    pub fn new(pool: Rc<ItemPool>, engine: SharedEngine) -> Self {
        Evaluator {
            pool,
            importer: ScriptImporter::new(Rc::clone(&engine)),
            engine,
            caching_enabled: Cell::new(false),
            path_properties_base_dir: RefCell::new(String::new()),
            cache: RefCell::new(FxHashMap::default()),
            invalidated: Mutex::new(FxHashSet::default()),
            free_path_cache: RefCell::new(FxHashMap::default()),
            property_dependencies: RefCell::new(FxHashMap::default()),
            requested_properties: RefCell::new(Vec::new()),
            eval_stack: RefCell::new(Vec::new()),
        }
    }

    pub fn pool(&self) -> &Rc<ItemPool> {
        &self.pool
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn importer(&self) -> &ScriptImporter {
        &self.importer
    }

    // Caching

    pub fn set_caching_enabled(&self, enabled: bool) {
        self.caching_enabled.set(enabled);
        if !enabled {
            self.cache.borrow_mut().clear();
        }
    }

    pub fn caching_enabled(&self) -> bool {
        self.caching_enabled.get()
    }

    pub fn set_path_properties_base_dir(&self, dir: impl Into<String>) {
        *self.path_properties_base_dir.borrow_mut() = dir.into();
    }

    pub fn clear_path_properties_base_dir(&self) {
        self.path_properties_base_dir.borrow_mut().clear();
    }

    pub fn path_properties_base_dir(&self) -> String {
        self.path_properties_base_dir.borrow().clone()
    }

    /// Requests invalidation of all cached values of an item. Safe to call
    /// concurrently; entries are purged on the next evaluation.
    pub fn invalidate_cache(&self, item: ItemId) {
        self.invalidated.lock().insert(item);
    }

    fn clear_cache_if_invalidated(&self) {
        let mut invalidated = self.invalidated.lock();
        if invalidated.is_empty() {
            return;
        }
        let items: FxHashSet<ItemId> = invalidated.drain().collect();
        drop(invalidated);
        self.cache
            .borrow_mut()
            .retain(|(item, _), _| !items.contains(item));
    }

    // Dependency recording

    pub fn property_dependencies(&self) -> FxHashMap<QualifiedId, QualifiedIdSet> {
        self.property_dependencies.borrow().clone()
    }

    pub fn clear_property_dependencies(&self) {
        self.property_dependencies.borrow_mut().clear();
    }

    fn qualified_property_id(&self, item: &Item, name: &str) -> QualifiedId {
        let mut id = match item.item_type() {
            ItemType::Module | ItemType::ModuleInstancePlaceholder => item
                .variant_property(&self.pool, "name")
                .map(|v| QualifiedId::from_string(&v.value.to_display_string()))
                .unwrap_or_default(),
            _ => QualifiedId::new(),
        };
        id.push(name);
        id
    }

    fn record_dependency(&self, readee: &QualifiedId) {
        if !self.caching_enabled.get() {
            return;
        }
        let requested = self.requested_properties.borrow();
        if let Some(reader) = requested.last() {
            if reader != readee {
                self.property_dependencies
                    .borrow_mut()
                    .entry(reader.clone())
                    .or_default()
                    .insert(readee.clone());
            }
        }
    }

    // Value access

    /// The raw value of a property; `Undefined` when nothing is assigned.
    pub fn value(&self, item: &Item, name: &str) -> Result<Variant> {
        self.evaluate_property(item, name).map(|(value, _)| value)
    }

    /// Whether the source text ever assigned the property (declaration
    /// defaults do not count).
    pub fn property_was_set(&self, item: &Item, name: &str) -> bool {
        item.property(&self.pool, name)
            .is_some_and(|value| !value.is_builtin_default())
    }

    /// Same as [`Self::property_was_set`]; used when deciding whether a
    /// built-in default was overridden for export.
    pub fn is_non_default_value(&self, item: &Item, name: &str) -> bool {
        self.property_was_set(item, name)
    }

    pub fn bool_value(&self, item: &Item, name: &str) -> Result<bool> {
        Ok(self.value(item, name)?.to_bool())
    }

    pub fn int_value(&self, item: &Item, name: &str, default: i64) -> Result<i64> {
        let value = self.value(item, name)?;
        if value.is_undefined() {
            return Ok(default);
        }
        Ok(value.to_int())
    }

    pub fn string_value(&self, item: &Item, name: &str) -> Result<String> {
        Ok(self.value(item, name)?.to_display_string())
    }

    pub fn string_list_value(&self, item: &Item, name: &str) -> Result<Vec<String>> {
        Ok(self.value(item, name)?.to_string_list())
    }

    /// `None` when the property was never assigned; otherwise the list.
    pub fn optional_string_list_value(
        &self,
        item: &Item,
        name: &str,
    ) -> Result<Option<Vec<String>>> {
        let value = self.value(item, name)?;
        if value.is_undefined() && !self.property_was_set(item, name) {
            return Ok(None);
        }
        Ok(Some(value.to_string_list()))
    }

    pub fn file_tags_value(&self, item: &Item, name: &str) -> Result<FileTags> {
        Ok(FileTags::from_string_list(
            self.value(item, name)?.to_string_list(),
        ))
    }

    /// Alias of [`Self::value`], matching the other typed accessors.
    pub fn variant_value(&self, item: &Item, name: &str) -> Result<Variant> {
        self.value(item, name)
    }

    /// Coerces an evaluated value to a declared type, resolving relative
    /// paths against the active path-properties base dir.
    pub fn convert_to_declared_type(
        &self,
        decl: &PropertyDeclaration,
        value: &Variant,
    ) -> Variant {
        convert_to_property_type(value, decl.typ, &self.path_properties_base_dir.borrow())
    }

    // Core evaluation

    pub fn evaluate_property(&self, item: &Item, name: &str) -> Result<(Variant, bool)> {
        self.clear_cache_if_invalidated();
        let Some(value) = item.property(&self.pool, name) else {
            return Ok((Variant::Undefined, false));
        };
        self.evaluate_value(item, name, &value)
    }

    /// Evaluates a specific value in the context of `(item, name)`; used
    /// for the main property chain and for `base`/`outer` references.
    pub fn evaluate_value(
        &self,
        item: &Item,
        name: &str,
        value: &ValuePtr,
    ) -> Result<(Variant, bool)> {
        let qid = self.qualified_property_id(item, name);
        self.record_dependency(&qid);
        match &**value {
            Value::Variant(v) => Ok((v.value.clone(), !v.is_builtin_default)),
            Value::Item(_) => Ok((Variant::Undefined, true)),
            Value::JsSource(source) => {
                let was_set = !source.is_builtin_default;
                let key = (item.id(), name.to_string());
                if self.caching_enabled.get() {
                    if let Some(entry) = self.cache.borrow().get(&key) {
                        if entry.generation == item.generation() {
                            return Ok((entry.value.clone(), was_set));
                        }
                    }
                }
                if self.eval_stack.borrow().contains(&key) {
                    return Err(ErrorInfo::evaluation(
                        format!("Cyclic evaluation of property '{name}'."),
                        source.location.clone(),
                    ));
                }
                self.eval_stack.borrow_mut().push(key.clone());
                self.requested_properties.borrow_mut().push(qid);
                let generation = item.generation();
                let result = self.evaluate_js_source(item, name, source);
                self.requested_properties.borrow_mut().pop();
                self.eval_stack.borrow_mut().pop();
                let variant = result?;
                if self.caching_enabled.get() {
                    self.cache.borrow_mut().insert(
                        key,
                        CacheEntry {
                            value: variant.clone(),
                            generation,
                        },
                    );
                }
                Ok((variant, was_set))
            }
        }
    }

    fn free_paths_of(&self, source: &JsSourceValue) -> Result<Rc<Vec<Vec<String>>>> {
        let code = source.source_code_for_evaluation();
        if let Some(paths) = self.free_path_cache.borrow().get(&code) {
            return Ok(Rc::clone(paths));
        }
        let paths = free_paths(&code, &source.location.file_path, source.location.line)
            .map_err(|error| self.error_from_js(&error, &source.location))?;
        let paths = Rc::new(paths);
        self.free_path_cache
            .borrow_mut()
            .insert(code, Rc::clone(&paths));
        Ok(paths)
    }

    fn evaluate_js_source(
        &self,
        item: &Item,
        name: &str,
        source: &JsSourceValue,
    ) -> Result<Variant> {
        debug!(property = name, location = %source.location, "evaluating property");
        let paths = self.free_paths_of(source)?;

        // Group subpaths by root so each root is resolved once.
        let mut roots: BTreeMap<String, Vec<Vec<String>>> = BTreeMap::new();
        for path in paths.iter() {
            roots
                .entry(path[0].clone())
                .or_default()
                .push(path[1..].to_vec());
        }

        let scope = JsValue::object();
        if let JsValue::Object(scope_obj) = &scope {
            for (root, subpaths) in roots {
                let bound = self.resolve_root(item, name, source, &root, &subpaths)?;
                if let Some(value) = bound {
                    scope_obj.borrow_mut().set(root, value);
                }
            }
        }

        let code = source.source_code_for_evaluation();
        let mut engine = self.engine.borrow_mut();
        engine.push_scope(&scope);
        let result = engine.evaluate(&code, &source.location.file_path, source.location.line);
        engine.pop_scope();
        engine.check_and_clear_exception();
        drop(engine);
        match result {
            Ok(value) => Ok(value.to_variant()),
            Err(error) => Err(self.error_from_js(&error, &source.location)),
        }
    }

    /// Converts an engine exception into a structured evaluation error
    /// with the synthesized backtrace.
    fn error_from_js(&self, error: &JsError, fallback: &CodeLocation) -> ErrorInfo {
        let mut info = ErrorInfo::evaluation(
            error.message.clone(),
            error.position().map_or_else(
                || fallback.clone(),
                |(file, line)| CodeLocation::new(file, line, 0),
            ),
        );
        for line in error.stack_trace().lines().skip(1) {
            if let Some(frame) = keel_diagnostic::parse_stack_line(line) {
                info.append(
                    format!("called from {}", frame.function),
                    CodeLocation::new(frame.file, frame.line, 0),
                );
            }
        }
        info
    }

    /// Resolves one root identifier through the scope chain.
    #[allow(clippy::too_many_lines)]
    fn resolve_root(
        &self,
        item: &Item,
        name: &str,
        source: &JsSourceValue,
        root: &str,
        subpaths: &[Vec<String>],
    ) -> Result<Option<JsValue>> {
        // Reserved bindings from the value chain.
        if root == "base" || root == "original" {
            let value = match source.base_value() {
                Some(base) => {
                    let (variant, _) = self.evaluate_value(item, name, &base)?;
                    JsValue::from_variant(&variant)
                }
                None => JsValue::Undefined,
            };
            return Ok(Some(value));
        }
        if root == "outer" {
            let value = match source.outer_item.get() {
                Some(outer) => {
                    let outer_item = self.pool.get(outer);
                    let (variant, _) = self.evaluate_property(&outer_item, name)?;
                    JsValue::from_variant(&variant)
                }
                None => JsValue::Undefined,
            };
            return Ok(Some(value));
        }
        if root == "product" || root == "project" {
            let wanted = if root == "product" {
                ItemType::Product
            } else {
                ItemType::Project
            };
            if let Some(context_item) = self.find_enclosing(item, wanted) {
                return Ok(Some(self.materialize_subpaths(&context_item, subpaths)?));
            }
        }

        // 1. The item itself (and its prototypes), 2. the scope chain.
        let mut current = Some(item.clone());
        while let Some(node) = current {
            if let Some(value) = node.property(&self.pool, root) {
                return Ok(Some(self.bind_property(&node, root, &value, subpaths)?));
            }
            current = node.scope().map(|id| self.pool.get(id));
        }

        // Extra evaluation scope attached to the value itself.
        if let Some(scope_id) = source.scope.get() {
            let scope_item = self.pool.get(scope_id);
            if let Some(value) = scope_item.property(&self.pool, root) {
                return Ok(Some(self.bind_property(&scope_item, root, &value, subpaths)?));
            }
        }

        // 3. The file's import scope.
        for (extension, _) in &source.file.extension_imports {
            if extension == root {
                return Ok(extension_object(root));
            }
        }
        for import in &source.file.js_imports {
            if import.scope_name == root {
                return Ok(Some(self.importer.import_files(&import.file_paths)?));
            }
        }

        // 4. The file scope.
        if root == "filePath" {
            return Ok(Some(JsValue::string(source.file.file_path.clone())));
        }
        if root == "path" {
            return Ok(Some(JsValue::string(source.file.dir_path.clone())));
        }

        // Unresolved: leave unbound; the engine reports the reference with
        // its location if it is actually reached.
        Ok(None)
    }

    fn bind_property(
        &self,
        owner: &Item,
        root: &str,
        value: &ValuePtr,
        subpaths: &[Vec<String>],
    ) -> Result<JsValue> {
        if let Some(nested) = value.as_item() {
            let nested_item = self.pool.get(nested);
            return self.materialize_subpaths_into(&nested_item, subpaths);
        }
        let (variant, _) = self.evaluate_value(owner, root, value)?;
        Ok(JsValue::from_variant(&variant))
    }

    fn find_enclosing(&self, item: &Item, wanted: ItemType) -> Option<Item> {
        // Scope chain first, then the parent chain.
        let mut current = Some(item.clone());
        while let Some(node) = current {
            if node.item_type() == wanted {
                return Some(node);
            }
            current = node.scope().map(|id| self.pool.get(id));
        }
        let mut current = Some(item.clone());
        while let Some(node) = current {
            if node.item_type() == wanted {
                return Some(node);
            }
            current = node.parent().map(|id| self.pool.get(id));
        }
        None
    }

    fn materialize_subpaths(&self, item: &Item, subpaths: &[Vec<String>]) -> Result<JsValue> {
        self.materialize_subpaths_into(item, subpaths)
    }

    /// Builds an object exposing exactly the requested member paths of an
    /// item; a bare reference materializes all plain properties.
    fn materialize_subpaths_into(&self, item: &Item, subpaths: &[Vec<String>]) -> Result<JsValue> {
        let object = JsValue::object();
        let JsValue::Object(obj) = &object else {
            return Ok(object);
        };
        let bare_reference = subpaths.iter().any(Vec::is_empty);
        if bare_reference {
            for (prop_name, value) in self.chain_properties(item) {
                if value.as_item().is_some() {
                    continue;
                }
                let (variant, _) = self.evaluate_value(item, &prop_name, &value)?;
                obj.borrow_mut()
                    .set(prop_name, JsValue::from_variant(&variant));
            }
        }
        let mut nested_groups: BTreeMap<String, Vec<Vec<String>>> = BTreeMap::new();
        for subpath in subpaths {
            let Some(first) = subpath.first() else {
                continue;
            };
            match item.property(&self.pool, first) {
                Some(value) if value.as_item().is_some() => {
                    nested_groups
                        .entry(first.clone())
                        .or_default()
                        .push(subpath[1..].to_vec());
                }
                Some(value) => {
                    let (variant, _) = self.evaluate_value(item, first, &value)?;
                    obj.borrow_mut()
                        .set(first.clone(), JsValue::from_variant(&variant));
                }
                None => {}
            }
        }
        for (prop_name, nested_subpaths) in nested_groups {
            if let Some(nested) = item.item_property(&self.pool, &prop_name) {
                let nested_item = self.pool.get(nested);
                let value = self.materialize_subpaths_into(&nested_item, &nested_subpaths)?;
                obj.borrow_mut().set(prop_name, value);
            }
        }
        Ok(object)
    }

    /// `(name, value)` pairs along the prototype chain, nearest first.
    fn chain_properties(&self, item: &Item) -> Vec<(String, ValuePtr)> {
        let mut seen = FxHashSet::default();
        let mut result = Vec::new();
        let mut current = Some(item.clone());
        while let Some(node) = current {
            for (prop_name, value) in node.properties() {
                if seen.insert(prop_name.clone()) {
                    result.push((prop_name, value));
                }
            }
            current = node.prototype().map(|id| self.pool.get(id));
        }
        result
    }

    // File-context scopes for direct script execution (probe configure).

    /// `(file_scope, import_scope)` objects for pushing around scripts
    /// executed outside property evaluation.
    pub fn file_context_scopes(&self, file: &FileContextPtr) -> Result<(JsValue, JsValue)> {
        let file_scope = JsValue::object();
        if let JsValue::Object(obj) = &file_scope {
            obj.borrow_mut()
                .set("filePath", JsValue::string(file.file_path.clone()));
            obj.borrow_mut()
                .set("path", JsValue::string(file.dir_path.clone()));
        }
        let import_scope = JsValue::object();
        if let JsValue::Object(obj) = &import_scope {
            for (extension, location) in &file.extension_imports {
                let value = extension_object(extension).ok_or_else(|| {
                    ErrorInfo::resolve(
                        format!("Unknown extension 'keel.{extension}'."),
                        location.clone(),
                    )
                })?;
                obj.borrow_mut().set(extension.clone(), value);
            }
            for import in &file.js_imports {
                let value = self.importer.import_files(&import.file_paths)?;
                obj.borrow_mut().set(import.scope_name.clone(), value);
            }
        }
        Ok((file_scope, import_scope))
    }

    /// Files backing the imports of a file context; recorded per probe for
    /// change tracking.
    pub fn imported_files_of(&self, file: &FileContextPtr) -> Vec<String> {
        file.js_imports
            .iter()
            .flat_map(|import| import.file_paths.iter().cloned())
            .collect()
    }
}

/// Scope guard enabling the evaluation cache (and the path-properties base
/// dir) for a span of many property reads.
pub struct EvalCacheEnabler<'a> {
    evaluator: &'a Evaluator,
}

impl<'a> EvalCacheEnabler<'a> {
    pub fn new(evaluator: &'a Evaluator, base_dir: impl Into<String>) -> Self {
        evaluator.set_caching_enabled(true);
        evaluator.set_path_properties_base_dir(base_dir);
        EvalCacheEnabler { evaluator }
    }
}

impl Drop for EvalCacheEnabler<'_> {
    fn drop(&mut self) {
        self.evaluator.set_caching_enabled(false);
        self.evaluator.clear_path_properties_base_dir();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use keel_ir::{FileContext, VariantValue};

    fn setup() -> (Rc<ItemPool>, Evaluator, FileContextPtr) {
        let pool = Rc::new(ItemPool::new());
        let engine: SharedEngine = Rc::new(RefCell::new(ScriptEngine::new()));
        let evaluator = Evaluator::new(Rc::clone(&pool), engine);
        let file = Rc::new(FileContext::new("/p/project.keel", ""));
        (pool, evaluator, file)
    }

    fn source(file: &FileContextPtr, code: &str, line: u32) -> JsSourceValue {
        JsSourceValue::new(code, CodeLocation::new(&file.file_path, line, 1), Rc::clone(file))
    }

    #[test]
    fn evaluates_literal_and_item_references() {
        let (pool, evaluator, file) = setup();
        let item = pool.create(ItemType::Product);
        item.set_variant_property("name", Variant::string("app"));
        item.set_source_property("targetName", source(&file, "name + \"-bin\"", 2));
        let value = evaluator.string_value(&item, "targetName").unwrap();
        assert_eq!(value, "app-bin");
    }

    #[test]
    fn scope_chain_reaches_enclosing_items() {
        let (pool, evaluator, file) = setup();
        let project = pool.create(ItemType::Project);
        project.set_variant_property("version", Variant::string("1.2"));
        let product = pool.create(ItemType::Product);
        product.set_scope(Some(project.id()));
        product.set_source_property("fullVersion", source(&file, "version + \"-beta\"", 3));
        assert_eq!(
            evaluator.string_value(&product, "fullVersion").unwrap(),
            "1.2-beta"
        );
    }

    #[test]
    fn base_refers_to_prototype_value() {
        let (pool, evaluator, file) = setup();
        let prototype = pool.create(ItemType::Product);
        prototype.set_source_property("list", source(&file, "[\"A\"]", 1));
        let derived = pool.create(ItemType::Product);
        derived.set_prototype(Some(prototype.id()));
        let derived_value = source(&file, "base.concat([\"B\"])", 2);
        derived_value.set_base(prototype.own_property("list"));
        derived.set_source_property("list", derived_value);
        assert_eq!(
            evaluator.string_list_value(&derived, "list").unwrap(),
            vec!["A", "B"]
        );
    }

    #[test]
    fn module_instance_properties_via_nested_items() {
        let (pool, evaluator, file) = setup();
        let product = pool.create(ItemType::Product);
        let module = pool.create(ItemType::ModuleInstancePlaceholder);
        module.set_variant_property("name", Variant::string("cpp"));
        module.set_variant_property("defines", Variant::string_list(["A"]));
        product.set_property("cpp", Value::item(module.id()));
        let group = pool.create(ItemType::Group);
        group.set_scope(Some(product.id()));
        group.set_source_property("combined", source(&file, "cpp.defines.concat([\"B\"])", 5));
        assert_eq!(
            evaluator.string_list_value(&group, "combined").unwrap(),
            vec!["A", "B"]
        );
    }

    #[test]
    fn cache_respects_invalidation() {
        let (pool, evaluator, file) = setup();
        let item = pool.create(ItemType::Product);
        item.set_source_property("value", source(&file, "name", 1));
        item.set_variant_property("name", Variant::string("first"));
        evaluator.set_caching_enabled(true);
        assert_eq!(evaluator.string_value(&item, "value").unwrap(), "first");
        // Mutation bumps the generation, so the stale entry is dropped even
        // without explicit invalidation.
        item.set_variant_property("name", Variant::string("second"));
        evaluator.invalidate_cache(item.id());
        assert_eq!(evaluator.string_value(&item, "value").unwrap(), "second");
        evaluator.set_caching_enabled(false);
    }

    #[test]
    fn dependency_recording_tracks_reads() {
        let (pool, evaluator, file) = setup();
        let module = pool.create(ItemType::ModuleInstancePlaceholder);
        module.set_variant_property("name", Variant::string("cpp"));
        module.set_source_property("flags", source(&file, "defines.concat([\"-O2\"])", 2));
        module.set_variant_property("defines", Variant::string_list(["A"]));
        let product = pool.create(ItemType::Product);
        product.set_property("cpp", Value::item(module.id()));
        module.set_scope(Some(product.id()));

        evaluator.set_caching_enabled(true);
        evaluator.string_list_value(&module, "flags").unwrap();
        evaluator.set_caching_enabled(false);
        let deps = evaluator.property_dependencies();
        let reader = QualifiedId::from_string("cpp.flags");
        let readee = QualifiedId::from_string("cpp.defines");
        assert!(deps.get(&reader).is_some_and(|set| set.contains(&readee)));
    }

    #[test]
    fn cyclic_evaluation_is_an_error() {
        let (pool, evaluator, file) = setup();
        let item = pool.create(ItemType::Product);
        item.set_source_property("a", source(&file, "b", 1));
        item.set_source_property("b", source(&file, "a", 2));
        let error = evaluator.value(&item, "a").unwrap_err();
        assert!(error.to_string().contains("Cyclic evaluation"));
    }

    #[test]
    fn evaluation_errors_carry_location() {
        let (pool, evaluator, file) = setup();
        let item = pool.create(ItemType::Product);
        item.set_source_property("bad", source(&file, "noSuchName", 7));
        let error = evaluator.value(&item, "bad").unwrap_err();
        assert_eq!(error.kind, keel_diagnostic::ErrorKind::Evaluation);
        assert!(error.location().file_path.contains("project.keel"));
        assert_eq!(error.location().line, 7);
    }

    #[test]
    fn property_was_set_ignores_builtin_defaults() {
        let (pool, evaluator, _file) = setup();
        let item = pool.create(ItemType::Rule);
        item.set_property(
            "multiplex",
            Rc::new(Value::Variant(VariantValue::builtin_default(Variant::Bool(
                false,
            )))),
        );
        assert!(!evaluator.property_was_set(&item, "multiplex"));
        item.set_variant_property("multiplex", Variant::Bool(true));
        assert!(evaluator.property_was_set(&item, "multiplex"));
    }

    #[test]
    fn eval_cache_enabler_is_scoped() {
        let (_pool, evaluator, _file) = setup();
        {
            let _enabler = EvalCacheEnabler::new(&evaluator, "/base");
            assert!(evaluator.caching_enabled());
            assert_eq!(evaluator.path_properties_base_dir(), "/base");
        }
        assert!(!evaluator.caching_enabled());
        assert_eq!(evaluator.path_properties_base_dir(), "");
    }

    #[test]
    fn outer_binding_evaluates_on_outer_item() {
        let (pool, evaluator, file) = setup();
        let product_module = pool.create(ItemType::ModuleInstancePlaceholder);
        product_module.set_variant_property("name", Variant::string("cpp"));
        product_module.set_variant_property("defines", Variant::string_list(["A"]));
        let group_module = pool.create(ItemType::ModuleInstancePlaceholder);
        group_module.set_variant_property("name", Variant::string("cpp"));
        let value = source(&file, "outer.concat([\"B\"])", 4);
        value.outer_item.set(Some(product_module.id()));
        group_module.set_source_property("defines", value);
        assert_eq!(
            evaluator.string_list_value(&group_module, "defines").unwrap(),
            vec!["A", "B"]
        );
    }
}
