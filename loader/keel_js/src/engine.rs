//! The script engine: scope stack, evaluation entry point, exception
//! channel and file-system observation recording.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::debug;

use crate::error::JsError;
use crate::interp::exec_program;
use crate::parser::parse_program;
use crate::value::{JsObject, JsValue};

/// Every file-system observation made through the engine, replayable for
/// change tracking.
#[derive(Clone, Debug, Default)]
pub struct FsObservations {
    pub canonical_paths: BTreeMap<String, String>,
    pub file_exists: BTreeMap<String, bool>,
    pub directory_entries: BTreeMap<String, Vec<String>>,
    pub file_last_modified: BTreeMap<String, u64>,
}

/// A script engine instance. One engine serves one loader session.
///
/// The scope chain is explicit: callers push scope objects before
/// evaluating and pop them after; identifier lookup walks the stack from
/// the most recently pushed scope down.
#[derive(Default)]
pub struct ScriptEngine {
    scopes: Vec<Rc<RefCell<JsObject>>>,
    current_file: String,
    last_error: Option<JsError>,
    environment: BTreeMap<String, String>,
    observations: FsObservations,
    imported_files: BTreeSet<String>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        ScriptEngine::default()
    }

    // Evaluation

    /// Evaluates `source` against the current scope stack.
    ///
    /// `line` is the 1-based line the source starts at inside `file_path`,
    /// so error positions point into the original file. Errors are also
    /// stored in the exception channel.
    pub fn evaluate(
        &mut self,
        source: &str,
        file_path: &str,
        line: u32,
    ) -> Result<JsValue, JsError> {
        debug!(file = file_path, line, "evaluating script");
        let program = parse_program(source, file_path, line).map_err(|error| {
            self.last_error = Some(error.clone());
            error
        })?;
        let saved_file = std::mem::replace(&mut self.current_file, file_path.to_string());
        let result = exec_program(self, &program);
        self.current_file = saved_file;
        if let Err(error) = &result {
            self.last_error = Some(error.clone());
        }
        result
    }

    pub(crate) fn current_file(&self) -> &str {
        &self.current_file
    }

    // Exception channel

    pub fn has_error_or_exception(&self) -> bool {
        self.last_error.is_some()
    }

    pub fn last_error(&self) -> Option<JsError> {
        self.last_error.clone()
    }

    /// Consumes the pending exception, if any.
    pub fn check_and_clear_exception(&mut self) -> Option<JsError> {
        self.last_error.take()
    }

    // Scope stack

    pub fn new_object(&self) -> JsValue {
        JsValue::object()
    }

    /// Pushes a scope object. Non-object values are ignored.
    pub fn push_scope(&mut self, scope: &JsValue) {
        if let JsValue::Object(obj) = scope {
            self.scopes.push(Rc::clone(obj));
        }
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    pub(crate) fn scopes(&self) -> &[Rc<RefCell<JsObject>>] {
        &self.scopes
    }

    pub(crate) fn replace_scopes(
        &mut self,
        scopes: Vec<Rc<RefCell<JsObject>>>,
    ) -> Vec<Rc<RefCell<JsObject>>> {
        std::mem::replace(&mut self.scopes, scopes)
    }

    pub(crate) fn restore_scopes(&mut self, scopes: Vec<Rc<RefCell<JsObject>>>) {
        self.scopes = scopes;
    }

    /// Looks an identifier up through the scope chain, innermost first.
    pub fn lookup(&self, name: &str) -> Option<JsValue> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.borrow().get(name) {
                return Some(value);
            }
        }
        None
    }

    /// Defines a binding in the innermost scope.
    pub fn define(&mut self, name: &str, value: JsValue) {
        if let Some(scope) = self.scopes.last() {
            scope.borrow_mut().set(name, value);
        }
    }

    /// Assigns to the innermost scope that already holds the name, or
    /// defines it in the innermost scope (configure scripts assign their
    /// result properties without declaring them).
    pub fn assign(&mut self, name: &str, value: JsValue) {
        for scope in self.scopes.iter().rev() {
            if scope.borrow().contains(name) {
                scope.borrow_mut().set(name, value);
                return;
            }
        }
        self.define(name, value);
    }

    // Environment

    pub fn set_environment(&mut self, environment: BTreeMap<String, String>) {
        self.environment = environment;
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    // Imported-file log

    pub fn record_import(&mut self, file_path: impl Into<String>) {
        self.imported_files.insert(file_path.into());
    }

    pub fn imported_files(&self) -> Vec<String> {
        self.imported_files.iter().cloned().collect()
    }

    // File-system observation wrappers

    pub fn file_exists(&mut self, path: &str) -> bool {
        let result = std::path::Path::new(path).exists();
        self.observations
            .file_exists
            .insert(path.to_string(), result);
        result
    }

    pub fn canonical_file_path(&mut self, path: &str) -> String {
        let result = std::fs::canonicalize(path)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| path.to_string());
        self.observations
            .canonical_paths
            .insert(path.to_string(), result.clone());
        result
    }

    pub fn directory_entries(&mut self, path: &str) -> Vec<String> {
        let mut entries: Vec<String> = std::fs::read_dir(path)
            .map(|dir| {
                dir.filter_map(|entry| {
                    entry
                        .ok()
                        .map(|e| e.file_name().to_string_lossy().to_string())
                })
                .collect()
            })
            .unwrap_or_default();
        entries.sort();
        self.observations
            .directory_entries
            .insert(path.to_string(), entries.clone());
        entries
    }

    pub fn file_last_modified(&mut self, path: &str) -> u64 {
        let stamp = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |duration| duration.as_secs());
        self.observations
            .file_last_modified
            .insert(path.to_string(), stamp);
        stamp
    }

    pub fn observations(&self) -> &FsObservations {
        &self.observations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine_with_scope() -> (ScriptEngine, JsValue) {
        let mut engine = ScriptEngine::new();
        let scope = engine.new_object();
        engine.push_scope(&scope);
        (engine, scope)
    }

    #[test]
    fn evaluates_expressions() {
        let (mut engine, _) = engine_with_scope();
        let value = engine.evaluate("1 + 2 * 3", "/t.keel", 1).unwrap();
        assert!(value.strict_equals(&JsValue::Int(7)));
        let value = engine.evaluate("\"a\" + \"b\"", "/t.keel", 1).unwrap();
        assert_eq!(value.to_js_string(), "ab");
    }

    #[test]
    fn scope_chain_lookup_is_innermost_first(){
        let mut engine = ScriptEngine::new();
        let outer = engine.new_object();
        engine.push_scope(&outer);
        engine.define("x", JsValue::Int(1));
        engine.define("y", JsValue::Int(10));
        let inner = engine.new_object();
        engine.push_scope(&inner);
        engine.define("x", JsValue::Int(2));
        let value = engine.evaluate("x + y", "/t.keel", 1).unwrap();
        assert!(value.strict_equals(&JsValue::Int(12)));
        engine.pop_scope();
        let value = engine.evaluate("x", "/t.keel", 1).unwrap();
        assert!(value.strict_equals(&JsValue::Int(1)));
    }

    #[test]
    fn configure_style_assignment_lands_in_top_scope() {
        let (mut engine, scope) = engine_with_scope();
        engine
            .evaluate("found = true; answer = [1, 2].length", "/probe.keel", 4)
            .unwrap();
        let JsValue::Object(obj) = &scope else {
            panic!("scope is not an object");
        };
        assert!(obj.borrow().get("found").unwrap().is_truthy());
        assert!(obj
            .borrow()
            .get("answer")
            .unwrap()
            .strict_equals(&JsValue::Int(2)));
    }

    #[test]
    fn errors_carry_positions_and_fill_the_channel() {
        let (mut engine, _) = engine_with_scope();
        let error = engine.evaluate("missing + 1", "/p.keel", 7).unwrap_err();
        assert_eq!(error.position(), Some(("/p.keel", 7)));
        assert!(engine.has_error_or_exception());
        let taken = engine.check_and_clear_exception().unwrap();
        assert_eq!(taken, error);
        assert!(!engine.has_error_or_exception());
    }

    #[test]
    fn functions_capture_their_definition_scopes() {
        let (mut engine, _) = engine_with_scope();
        engine
            .evaluate(
                "var factor = 3; function times(x) { return x * factor; }",
                "/u.js",
                1,
            )
            .unwrap();
        let value = engine.evaluate("times(5)", "/u.js", 1).unwrap();
        assert!(value.strict_equals(&JsValue::Int(15)));
    }

    #[test]
    fn iife_import_shape_returns_bindings() {
        let (mut engine, _) = engine_with_scope();
        let source = "(function(){\nvar limit = 3;\nfunction helper(x){ return x + limit; }\nreturn {limit: limit, helper: helper}})()";
        let value = engine.evaluate(source, "/u.js", 1).unwrap();
        let JsValue::Object(obj) = &value else {
            panic!("import did not return an object");
        };
        assert!(obj.borrow().get("limit").unwrap().strict_equals(&JsValue::Int(3)));
        assert!(obj.borrow().get("helper").unwrap().is_function());
    }

    #[test]
    fn ternary_and_logical_operators() {
        let (mut engine, _) = engine_with_scope();
        let value = engine
            .evaluate("true ? [\"a\"].concat([\"b\"]) : []", "/t.keel", 1)
            .unwrap();
        assert_eq!(value.to_js_string(), "a,b");
        let value = engine.evaluate("undefined || \"fallback\"", "/t.keel", 1).unwrap();
        assert_eq!(value.to_js_string(), "fallback");
    }

    #[test]
    fn observation_log_records_queries() {
        let mut engine = ScriptEngine::new();
        assert!(!engine.file_exists("/definitely/not/here.txt"));
        assert_eq!(
            engine.observations().file_exists.get("/definitely/not/here.txt"),
            Some(&false)
        );
        assert_eq!(engine.file_last_modified("/definitely/not/here.txt"), 0);
    }

    #[test]
    fn throw_statement_surfaces_as_error() {
        let (mut engine, _) = engine_with_scope();
        let error = engine
            .evaluate("throw \"configure failed\"", "/probe.keel", 9)
            .unwrap_err();
        assert_eq!(error.message, "configure failed");
        assert_eq!(error.position(), Some(("/probe.keel", 9)));
    }
}
