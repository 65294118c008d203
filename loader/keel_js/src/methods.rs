//! Builtin methods on arrays, strings and numbers.

use crate::error::{no_such_method, JsError};
use crate::interp::call_function;
use crate::value::JsValue;
use crate::ScriptEngine;

/// Dispatches a method call on a builtin receiver type.
pub(crate) fn dispatch_method(
    engine: &mut ScriptEngine,
    receiver: &JsValue,
    name: &str,
    args: &[JsValue],
    line: u32,
) -> Result<JsValue, JsError> {
    let result = match receiver {
        JsValue::Array(_) => array_method(engine, receiver, name, args, line),
        JsValue::String(_) => string_method(receiver, name, args),
        JsValue::Int(_) | JsValue::Double(_) => number_method(receiver, name),
        _ => None,
    };
    match result {
        Some(value) => value,
        None => Err(no_such_method(name, receiver.type_name()).with_frame(
            "<script>",
            engine.current_file(),
            line,
        )),
    }
}

#[allow(clippy::too_many_lines)]
fn array_method(
    engine: &mut ScriptEngine,
    receiver: &JsValue,
    name: &str,
    args: &[JsValue],
    line: u32,
) -> Option<Result<JsValue, JsError>> {
    let JsValue::Array(items) = receiver else {
        return None;
    };
    Some(match name {
        "concat" => {
            let mut result = items.borrow().clone();
            for arg in args {
                match arg {
                    JsValue::Array(other) => result.extend(other.borrow().iter().cloned()),
                    scalar => result.push(scalar.clone()),
                }
            }
            Ok(JsValue::array(result))
        }
        "join" => {
            let separator = args
                .first()
                .map_or_else(|| ",".to_string(), JsValue::to_js_string);
            Ok(JsValue::string(
                items
                    .borrow()
                    .iter()
                    .map(JsValue::to_js_string)
                    .collect::<Vec<_>>()
                    .join(&separator),
            ))
        }
        "push" => {
            let mut items = items.borrow_mut();
            for arg in args {
                items.push(arg.clone());
            }
            Ok(JsValue::Int(items.len() as i64))
        }
        "contains" | "includes" => {
            let needle = args.first().cloned().unwrap_or(JsValue::Undefined);
            Ok(JsValue::Bool(
                items.borrow().iter().any(|item| item.strict_equals(&needle)),
            ))
        }
        "indexOf" => {
            let needle = args.first().cloned().unwrap_or(JsValue::Undefined);
            Ok(JsValue::Int(
                items
                    .borrow()
                    .iter()
                    .position(|item| item.strict_equals(&needle))
                    .map_or(-1, |idx| idx as i64),
            ))
        }
        "slice" => {
            let items = items.borrow();
            let len = items.len() as i64;
            let clamp = |v: i64| -> usize {
                if v < 0 {
                    (len + v).max(0) as usize
                } else {
                    v.min(len) as usize
                }
            };
            let start = clamp(args.first().and_then(JsValue::as_number).unwrap_or(0.0) as i64);
            let end = clamp(
                args.get(1)
                    .and_then(JsValue::as_number)
                    .unwrap_or(len as f64) as i64,
            );
            Ok(JsValue::array(
                items.get(start..end.max(start)).unwrap_or(&[]).to_vec(),
            ))
        }
        "filter" => {
            let function = args.first().cloned().unwrap_or(JsValue::Undefined);
            let snapshot = items.borrow().clone();
            let mut result = Vec::new();
            for item in snapshot {
                let keep = match call_function(engine, &function, &[item.clone()], "filter", line)
                {
                    Ok(v) => v,
                    Err(e) => return Some(Err(e)),
                };
                if keep.is_truthy() {
                    result.push(item);
                }
            }
            Ok(JsValue::array(result))
        }
        "map" => {
            let function = args.first().cloned().unwrap_or(JsValue::Undefined);
            let snapshot = items.borrow().clone();
            let mut result = Vec::with_capacity(snapshot.len());
            for item in snapshot {
                let mapped = match call_function(engine, &function, &[item], "map", line) {
                    Ok(v) => v,
                    Err(e) => return Some(Err(e)),
                };
                result.push(mapped);
            }
            Ok(JsValue::array(result))
        }
        _ => return None,
    })
}

fn string_method(
    receiver: &JsValue,
    name: &str,
    args: &[JsValue],
) -> Option<Result<JsValue, JsError>> {
    let JsValue::String(s) = receiver else {
        return None;
    };
    let arg_string = |idx: usize| {
        args.get(idx)
            .map_or_else(String::new, JsValue::to_js_string)
    };
    Some(match name {
        "startsWith" => Ok(JsValue::Bool(s.starts_with(&arg_string(0)))),
        "endsWith" => Ok(JsValue::Bool(s.ends_with(&arg_string(0)))),
        "contains" | "includes" => Ok(JsValue::Bool(s.contains(&arg_string(0)))),
        "toUpperCase" => Ok(JsValue::string(s.to_uppercase())),
        "toLowerCase" => Ok(JsValue::string(s.to_lowercase())),
        "trim" => Ok(JsValue::string(s.trim().to_string())),
        "split" => {
            let separator = arg_string(0);
            let parts: Vec<JsValue> = if separator.is_empty() {
                s.chars().map(|c| JsValue::string(c.to_string())).collect()
            } else {
                s.split(&separator)
                    .map(|part| JsValue::string(part.to_string()))
                    .collect()
            };
            Ok(JsValue::array(parts))
        }
        "replace" => {
            let pattern = arg_string(0);
            let replacement = arg_string(1);
            Ok(JsValue::string(s.replacen(&pattern, &replacement, 1)))
        }
        "indexOf" => Ok(JsValue::Int(
            s.find(&arg_string(0)).map_or(-1, |idx| idx as i64),
        )),
        "substring" | "slice" => {
            let len = s.chars().count() as i64;
            let clamp = |v: f64| (v.max(0.0) as i64).min(len) as usize;
            let start = clamp(args.first().and_then(JsValue::as_number).unwrap_or(0.0));
            let end = clamp(
                args.get(1)
                    .and_then(JsValue::as_number)
                    .unwrap_or(len as f64),
            );
            let (start, end) = if start <= end { (start, end) } else { (end, start) };
            Ok(JsValue::string(
                s.chars().skip(start).take(end - start).collect::<String>(),
            ))
        }
        "concat" => {
            let mut result = s.to_string();
            for arg in args {
                result.push_str(&arg.to_js_string());
            }
            Ok(JsValue::string(result))
        }
        "toString" => Ok(receiver.clone()),
        _ => return None,
    })
}

fn number_method(receiver: &JsValue, name: &str) -> Option<Result<JsValue, JsError>> {
    match name {
        "toString" => Some(Ok(JsValue::string(receiver.to_js_string()))),
        _ => None,
    }
}
