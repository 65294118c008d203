//! Built-in extensions bound by `import keel.X`.
//!
//! Extensions are plain objects of native functions. File-system queries go
//! through the engine's observation wrappers so every result lands in the
//! replayable log.

use keel_ir::{fileinfo, Variant, Version};

use crate::error::{wrong_argument_count, JsError};
use crate::value::JsValue;
use crate::ScriptEngine;

/// Names of all built-in extensions, for import resolution and for
/// detecting extension usage in exported modules.
pub fn extension_names() -> &'static [&'static str] {
    &["FileInfo", "Utilities", "Environment", "File"]
}

/// Builds the object backing `import keel.<name>`; `None` for unknown names.
pub fn extension_object(name: &str) -> Option<JsValue> {
    let object = JsValue::object();
    let JsValue::Object(obj) = &object else {
        return None;
    };
    {
        let mut obj = obj.borrow_mut();
        match name {
            "FileInfo" => {
                obj.set("joinPaths", JsValue::Native(file_info_join_paths, "joinPaths"));
                obj.set("fileName", JsValue::Native(file_info_file_name, "fileName"));
                obj.set("baseName", JsValue::Native(file_info_base_name, "baseName"));
                obj.set("path", JsValue::Native(file_info_path, "path"));
                obj.set("cleanPath", JsValue::Native(file_info_clean_path, "cleanPath"));
                obj.set(
                    "isAbsolutePath",
                    JsValue::Native(file_info_is_absolute, "isAbsolutePath"),
                );
            }
            "Utilities" => {
                obj.set("getHash", JsValue::Native(utilities_get_hash, "getHash"));
                obj.set(
                    "versionCompare",
                    JsValue::Native(utilities_version_compare, "versionCompare"),
                );
            }
            "Environment" => {
                obj.set("getEnv", JsValue::Native(environment_get_env, "getEnv"));
                obj.set("currentEnv", JsValue::Native(environment_current_env, "currentEnv"));
            }
            "File" => {
                obj.set("exists", JsValue::Native(file_exists, "exists"));
                obj.set(
                    "directoryEntries",
                    JsValue::Native(file_directory_entries, "directoryEntries"),
                );
                obj.set(
                    "lastModified",
                    JsValue::Native(file_last_modified, "lastModified"),
                );
                obj.set(
                    "canonicalFilePath",
                    JsValue::Native(file_canonical_path, "canonicalFilePath"),
                );
            }
            _ => return None,
        }
    }
    Some(object)
}

fn single_string_arg(args: &[JsValue], function: &str) -> Result<String, JsError> {
    match args.first() {
        Some(value) => Ok(value.to_js_string()),
        None => Err(wrong_argument_count(function, 1, 0)),
    }
}

// FileInfo

fn file_info_join_paths(_: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let mut result = String::new();
    for arg in args {
        let part = arg.to_js_string();
        if part.is_empty() {
            continue;
        }
        if result.is_empty() || fileinfo::is_absolute(&part) {
            result = part;
        } else {
            result = format!("{result}/{part}");
        }
    }
    Ok(JsValue::string(fileinfo::clean_path(&result)))
}

fn file_info_file_name(_: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let path = single_string_arg(args, "fileName")?;
    Ok(JsValue::string(fileinfo::file_name(&path).to_string()))
}

fn file_info_base_name(_: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let path = single_string_arg(args, "baseName")?;
    Ok(JsValue::string(fileinfo::base_name(&path).to_string()))
}

fn file_info_path(_: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let path = single_string_arg(args, "path")?;
    Ok(JsValue::string(fileinfo::path(&path)))
}

fn file_info_clean_path(_: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let path = single_string_arg(args, "cleanPath")?;
    Ok(JsValue::string(fileinfo::clean_path(&path)))
}

fn file_info_is_absolute(_: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let path = single_string_arg(args, "isAbsolutePath")?;
    Ok(JsValue::Bool(fileinfo::is_absolute(&path)))
}

// Utilities

fn utilities_get_hash(_: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let value = args.first().cloned().unwrap_or(JsValue::Undefined);
    Ok(JsValue::string(value.to_variant().config_hash()))
}

fn utilities_version_compare(_: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    if args.len() < 2 {
        return Err(wrong_argument_count("versionCompare", 2, args.len()));
    }
    let a = Version::from_string(&args[0].to_js_string())
        .ok_or_else(|| JsError::new("invalid version string"))?;
    let b = Version::from_string(&args[1].to_js_string())
        .ok_or_else(|| JsError::new("invalid version string"))?;
    Ok(JsValue::Int(match a.cmp(&b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }))
}

// Environment

fn environment_get_env(engine: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let name = single_string_arg(args, "getEnv")?;
    Ok(engine
        .environment()
        .get(&name)
        .map_or(JsValue::Undefined, |v| JsValue::string(v.clone())))
}

fn environment_current_env(engine: &mut ScriptEngine, _: &[JsValue]) -> Result<JsValue, JsError> {
    let mut map = std::collections::BTreeMap::new();
    for (key, value) in engine.environment() {
        map.insert(key.clone(), Variant::String(value.clone()));
    }
    Ok(JsValue::from_variant(&Variant::Map(map)))
}

// File (all queries recorded in the observation log)

fn file_exists(engine: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let path = single_string_arg(args, "exists")?;
    Ok(JsValue::Bool(engine.file_exists(&path)))
}

fn file_directory_entries(engine: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let path = single_string_arg(args, "directoryEntries")?;
    let entries = engine.directory_entries(&path);
    Ok(JsValue::array(
        entries.into_iter().map(JsValue::string).collect(),
    ))
}

fn file_last_modified(engine: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let path = single_string_arg(args, "lastModified")?;
    let stamp = engine.file_last_modified(&path);
    Ok(JsValue::Int(i64::try_from(stamp).unwrap_or(i64::MAX)))
}

fn file_canonical_path(engine: &mut ScriptEngine, args: &[JsValue]) -> Result<JsValue, JsError> {
    let path = single_string_arg(args, "canonicalFilePath")?;
    Ok(JsValue::string(engine.canonical_file_path(&path)))
}
