//! Probe execution with caching against previous runs.
//!
//! Lookup precedence: stored probes from an earlier resolve (project-level
//! for probes under `Project` items and shadow products, product-level
//! otherwise), then probes already run this session (matched by code
//! location, condition and initial properties), then actual execution.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use keel_diagnostic::{ErrorInfo, Result};
use keel_ir::{CodeLocation, Item, ItemType, Variant};

use crate::evaluator::Evaluator;
use crate::module_loader::ProductContext;
use crate::params::{SetupParameters, SHADOW_PRODUCT_PREFIX};

/// The immutable result of one probe execution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    /// First non-empty `id` on the prototype chain plus the file path.
    pub global_id: String,
    pub location: CodeLocation,
    pub condition: bool,
    pub configure_script: String,
    /// Property values after configure ran.
    pub properties: BTreeMap<String, Variant>,
    /// Property values before configure ran; the cache matching key.
    pub initial_properties: BTreeMap<String, Variant>,
    /// Files imported while executing configure.
    pub imported_files: Vec<String>,
}

impl ProbeRecord {
    /// True when any file imported by the configure script changed after
    /// the given resolve time.
    fn needs_reconfigure(&self, last_resolve_time: u64) -> bool {
        self.imported_files.iter().any(|file| {
            std::fs::metadata(file)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
                .is_some_and(|mtime| mtime.as_secs() > last_resolve_time)
        })
    }
}

/// Counters reported after a resolve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProbeStats {
    pub encountered: usize,
    pub run: usize,
    pub cached_current: usize,
    pub cached_old: usize,
}

/// Runs `Probe.configure` scripts during loading.
pub struct ProbesResolver<'a> {
    params: &'a SetupParameters,
    evaluator: &'a Evaluator,
    old_project_probes: RefCell<FxHashMap<String, Vec<Rc<ProbeRecord>>>>,
    old_product_probes: RefCell<FxHashMap<String, Vec<Rc<ProbeRecord>>>>,
    current_probes: RefCell<FxHashMap<CodeLocation, Vec<Rc<ProbeRecord>>>>,
    last_resolve_time: RefCell<u64>,
    stats: RefCell<ProbeStats>,
}

impl<'a> ProbesResolver<'a> {
    pub fn new(params: &'a SetupParameters, evaluator: &'a Evaluator) -> Self {
        ProbesResolver {
            params,
            evaluator,
            old_project_probes: RefCell::new(FxHashMap::default()),
            old_product_probes: RefCell::new(FxHashMap::default()),
            current_probes: RefCell::new(FxHashMap::default()),
            last_resolve_time: RefCell::new(0),
            stats: RefCell::new(ProbeStats::default()),
        }
    }

    pub fn set_old_project_probes(&self, probes: Vec<ProbeRecord>) {
        let mut map = self.old_project_probes.borrow_mut();
        map.clear();
        for probe in probes {
            map.entry(probe.global_id.clone())
                .or_default()
                .push(Rc::new(probe));
        }
    }

    pub fn set_old_product_probes(&self, probes: BTreeMap<String, Vec<ProbeRecord>>) {
        let mut map = self.old_product_probes.borrow_mut();
        map.clear();
        for (product, records) in probes {
            map.insert(product, records.into_iter().map(Rc::new).collect());
        }
    }

    pub fn set_last_resolve_time(&self, time: u64) {
        *self.last_resolve_time.borrow_mut() = time;
    }

    pub fn stats(&self) -> ProbeStats {
        *self.stats.borrow()
    }

    /// Resolves every `Probe` child of `item` into the product context.
    pub fn resolve_probes(&self, product: &ProductContext, item: &Item) -> Result<()> {
        let pool = self.evaluator.pool();
        for child_id in item.children() {
            let child = pool.get(child_id);
            if child.item_type() == ItemType::Probe {
                self.resolve_probe(product, item, &child)?;
            }
        }
        Ok(())
    }

    fn resolve_probe(&self, product: &ProductContext, parent: &Item, probe: &Item) -> Result<()> {
        debug!(location = %probe.location(), "resolving probe");
        self.stats.borrow_mut().encountered += 1;
        let pool = self.evaluator.pool();

        let global_id = probe_global_id(pool, probe).ok_or_else(|| {
            ErrorInfo::resolve("Probe.id must be set.", probe.location())
        })?;
        let configure = probe
            .source_property(pool, "configure")
            .ok_or_else(|| ErrorInfo::resolve("Probe.configure must be set.", probe.location()))?;
        let Some(configure_source) = configure.as_js_source() else {
            return Err(ErrorInfo::resolve(
                "Probe.configure must be set.",
                probe.location(),
            ));
        };
        let source_code = configure_source.source_code().to_string();

        // Bindings: every property along the prototype chain except
        // `configure`; all but `condition` are the matching key.
        let mut binding_names = Vec::new();
        let mut initial_properties = BTreeMap::new();
        let mut current = Some(probe.clone());
        while let Some(node) = current {
            for (name, _) in node.properties() {
                if name == "configure" || binding_names.contains(&name) {
                    continue;
                }
                binding_names.push(name);
            }
            current = node.prototype().map(|id| pool.get(id));
        }
        let mut bindings = BTreeMap::new();
        for name in &binding_names {
            let value = self.evaluator.value(probe, name)?;
            if name != "condition" {
                initial_properties.insert(name.clone(), value.clone());
            }
            bindings.insert(name.clone(), value);
        }
        let condition = self.evaluator.bool_value(probe, "condition")?;

        let in_project_scope = parent.item_type() == ItemType::Project
            || product.name.starts_with(SHADOW_PRODUCT_PREFIX);
        let mut resolved = if in_project_scope {
            self.find_old_project_probe(&global_id, condition, &initial_properties, &source_code)
        } else {
            self.find_old_product_probe(
                &product.unique_name,
                condition,
                &initial_properties,
                &source_code,
            )
        };
        if resolved.is_some() {
            debug!("probe results cached from earlier run");
            self.stats.borrow_mut().cached_old += 1;
        } else {
            resolved = self.find_current_probe(&probe.location(), condition, &initial_properties);
            if resolved.is_some() {
                debug!("probe results cached from current run");
                self.stats.borrow_mut().cached_current += 1;
            }
        }

        let mut configure_scope = None;
        let mut imported_files = Vec::new();
        if !condition {
            debug!("probe disabled; skipping");
        } else if resolved.is_none() {
            self.stats.borrow_mut().run += 1;
            debug!("configure script needs to run");
            let (file_scope, import_scope) =
                self.evaluator.file_context_scopes(&configure_source.file)?;
            let scope = keel_js::JsValue::object();
            if let keel_js::JsValue::Object(obj) = &scope {
                let mut obj = obj.borrow_mut();
                for (name, value) in &bindings {
                    obj.set(name.clone(), keel_js::JsValue::from_variant(value));
                }
            }
            let mut engine = self.evaluator.engine().borrow_mut();
            engine.push_scope(&file_scope);
            engine.push_scope(&import_scope);
            engine.push_scope(&scope);
            let result = engine.evaluate(
                &configure_source.source_code_for_evaluation(),
                &configure_source.location.file_path,
                configure_source.location.line,
            );
            engine.pop_scope();
            engine.pop_scope();
            engine.pop_scope();
            engine.check_and_clear_exception();
            drop(engine);
            if let Err(error) = result {
                return Err(ErrorInfo::evaluation(
                    error.message,
                    configure_source.location.clone(),
                ));
            }
            imported_files = self.evaluator.imported_files_of(&configure_source.file);
            configure_scope = Some(scope);
        } else if let Some(record) = &resolved {
            imported_files = record.imported_files.clone();
        }

        // Read back the post-configure values and update the probe item so
        // later property reads see the results.
        let mut properties = BTreeMap::new();
        for name in &binding_names {
            let new_value = if let Some(record) = &resolved {
                record
                    .properties
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| bindings.get(name).cloned().unwrap_or_default())
            } else if condition {
                let raw = configure_scope
                    .as_ref()
                    .and_then(|scope| match scope {
                        keel_js::JsValue::Object(obj) => obj.borrow().get(name),
                        _ => None,
                    })
                    .map_or(Variant::Undefined, |value| value.to_variant());
                match probe.property_declaration(pool, name) {
                    Some(decl) => self.evaluator.convert_to_declared_type(&decl, &raw),
                    None => raw,
                }
            } else {
                initial_properties.get(name).cloned().unwrap_or_default()
            };
            if Some(&new_value) != bindings.get(name) {
                probe.set_variant_property(name.clone(), new_value.clone());
            }
            properties.insert(name.clone(), new_value);
        }

        let record = match resolved {
            Some(record) => record,
            None => {
                let record = Rc::new(ProbeRecord {
                    global_id,
                    location: probe.location(),
                    condition,
                    configure_script: source_code,
                    properties,
                    initial_properties,
                    imported_files,
                });
                self.current_probes
                    .borrow_mut()
                    .entry(probe.location())
                    .or_default()
                    .push(Rc::clone(&record));
                record
            }
        };
        product.probes.borrow_mut().push(record);
        Ok(())
    }

    fn find_old_project_probe(
        &self,
        global_id: &str,
        condition: bool,
        initial_properties: &BTreeMap<String, Variant>,
        source_code: &str,
    ) -> Option<Rc<ProbeRecord>> {
        if self.params.force_probe_execution {
            return None;
        }
        self.old_project_probes
            .borrow()
            .get(global_id)?
            .iter()
            .find(|probe| {
                probe_matches(probe, condition, initial_properties, Some(source_code))
                    && !probe.needs_reconfigure(*self.last_resolve_time.borrow())
            })
            .cloned()
    }

    fn find_old_product_probe(
        &self,
        product_name: &str,
        condition: bool,
        initial_properties: &BTreeMap<String, Variant>,
        source_code: &str,
    ) -> Option<Rc<ProbeRecord>> {
        if self.params.force_probe_execution {
            return None;
        }
        self.old_product_probes
            .borrow()
            .get(product_name)?
            .iter()
            .find(|probe| {
                probe_matches(probe, condition, initial_properties, Some(source_code))
                    && !probe.needs_reconfigure(*self.last_resolve_time.borrow())
            })
            .cloned()
    }

    /// Same code location implies the same configure script, so the
    /// in-session cache matches on condition and initial properties only.
    fn find_current_probe(
        &self,
        location: &CodeLocation,
        condition: bool,
        initial_properties: &BTreeMap<String, Variant>,
    ) -> Option<Rc<ProbeRecord>> {
        self.current_probes
            .borrow()
            .get(location)?
            .iter()
            .find(|probe| probe_matches(probe, condition, initial_properties, None))
            .cloned()
    }

    pub fn print_profiling_info(&self) {
        if !self.params.log_elapsed_time {
            return;
        }
        let stats = self.stats();
        info!(
            "{} probes encountered, {} configure scripts executed, {} re-used from current run, {} re-used from earlier run.",
            stats.encountered, stats.run, stats.cached_current, stats.cached_old
        );
    }
}

fn probe_global_id(pool: &keel_ir::ItemPool, probe: &Item) -> Option<String> {
    let mut current = Some(probe.clone());
    let mut id = String::new();
    while let Some(node) = current {
        if !node.id_string().is_empty() {
            id = node.id_string();
            break;
        }
        current = node.prototype().map(|proto| pool.get(proto));
    }
    if id.is_empty() {
        return None;
    }
    let file_path = probe.file().map(|f| f.file_path.clone())?;
    Some(format!("{id}_{file_path}"))
}

fn probe_matches(
    probe: &ProbeRecord,
    condition: bool,
    initial_properties: &BTreeMap<String, Variant>,
    configure_script: Option<&str>,
) -> bool {
    probe.condition == condition
        && probe.initial_properties == *initial_properties
        && configure_script.map_or(true, |script| probe.configure_script == script)
}
