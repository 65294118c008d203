//! Imports script files as objects of their top-level bindings.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use keel_diagnostic::{ErrorInfo, Result};
use keel_ir::CodeLocation;
use keel_js::JsValue;

use crate::evaluator::SharedEngine;

/// Converts imported script source into an object whose properties are the
/// file's top-level `function` and `var` declarations.
///
/// The source is wrapped into an immediately-invoked function returning an
/// object literal that maps each top-level name to itself; the result is
/// evaluated once per file path and cached. Properties copy by reference
/// into the calling scope.
pub struct ScriptImporter {
    engine: SharedEngine,
    cache: RefCell<FxHashMap<String, JsValue>>,
}

impl ScriptImporter {
    pub fn new(engine: SharedEngine) -> Self {
        ScriptImporter {
            engine,
            cache: RefCell::new(FxHashMap::default()),
        }
    }

    /// Imports one script file.
    pub fn import_file(&self, file_path: &str) -> Result<JsValue> {
        if let Some(cached) = self.cache.borrow().get(file_path) {
            return Ok(cached.clone());
        }
        debug!(file = file_path, "importing script file");
        let source = std::fs::read_to_string(file_path).map_err(|error| {
            ErrorInfo::resolve(
                format!("Cannot read imported file '{file_path}': {error}."),
                CodeLocation::file_only(file_path),
            )
        })?;
        let names = keel_parse::top_level_declarations(&source, file_path)?;
        let mut suffix = String::from("\nreturn {");
        for (idx, name) in names.iter().enumerate() {
            if idx > 0 {
                suffix.push(',');
            }
            suffix.push_str(name);
            suffix.push(':');
            suffix.push_str(name);
        }
        suffix.push_str("}})()");
        let wrapped = format!("(function(){{\n{source}{suffix}");
        let mut engine = self.engine.borrow_mut();
        engine.record_import(file_path);
        let result = engine.evaluate(&wrapped, file_path, 1).map_err(|error| {
            let position = error.position().map_or_else(
                || CodeLocation::file_only(file_path),
                |(file, line)| CodeLocation::new(file, line, 0),
            );
            ErrorInfo::evaluation(error.message.clone(), position)
        })?;
        engine.check_and_clear_exception();
        drop(engine);
        self.cache
            .borrow_mut()
            .insert(file_path.to_string(), result.clone());
        Ok(result)
    }

    /// Imports several files into one merged object (directory imports).
    pub fn import_files(&self, file_paths: &[String]) -> Result<JsValue> {
        if file_paths.len() == 1 {
            return self.import_file(&file_paths[0]);
        }
        let merged = JsValue::object();
        for file_path in file_paths {
            let imported = self.import_file(file_path)?;
            if let (JsValue::Object(target), JsValue::Object(source)) = (&merged, &imported) {
                for (name, value) in source.borrow().entries() {
                    target.borrow_mut().set(name, value);
                }
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use keel_js::ScriptEngine;

    fn importer_with_file(content: &str) -> (ScriptImporter, tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("util.js");
        std::fs::write(&path, content).unwrap();
        let engine: SharedEngine = Rc::new(RefCell::new(ScriptEngine::new()));
        (
            ScriptImporter::new(engine),
            dir,
            path.to_string_lossy().replace('\\', "/"),
        )
    }

    #[test]
    fn exposes_top_level_bindings() {
        let (importer, _dir, path) =
            importer_with_file("var limit = 4;\nfunction double(x) { return x * 2; }\n");
        let object = importer.import_file(&path).unwrap();
        let JsValue::Object(obj) = &object else {
            panic!("import did not produce an object");
        };
        assert!(obj.borrow().get("limit").is_some());
        assert!(obj.borrow().get("double").unwrap().is_function());
    }

    #[test]
    fn import_is_cached_per_path() {
        let (importer, _dir, path) = importer_with_file("var x = 1;\n");
        let first = importer.import_file(&path).unwrap();
        let second = importer.import_file(&path).unwrap();
        assert!(first.strict_equals(&second));
    }

    #[test]
    fn syntax_errors_are_fatal_with_location() {
        let (importer, _dir, path) = importer_with_file("var = broken");
        let error = importer.import_file(&path).unwrap_err();
        assert_eq!(error.kind, keel_diagnostic::ErrorKind::Evaluation);
        assert!(error.location().file_path.ends_with("util.js"));
    }
}
