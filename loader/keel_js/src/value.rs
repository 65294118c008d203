//! Runtime values for the embedded script engine.
//!
//! Heap values (strings, arrays, objects) share their storage through `Rc`;
//! the engine is single-threaded per project, so no atomics are needed.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use keel_ir::Variant;

use crate::ast::Function;
use crate::engine::ScriptEngine;
use crate::error::JsError;

/// A native function provided by a built-in extension.
pub type NativeFn = fn(&mut ScriptEngine, &[JsValue]) -> Result<JsValue, JsError>;

/// An object: ordered string-keyed properties.
#[derive(Debug, Default)]
pub struct JsObject {
    properties: BTreeMap<String, JsValue>,
}

impl JsObject {
    pub fn get(&self, name: &str) -> Option<JsValue> {
        self.properties.get(name).cloned()
    }

    pub fn set(&mut self, name: impl Into<String>, value: JsValue) {
        self.properties.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, JsValue)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// A script function value: parameters, body, and the scope chain captured
/// at definition time.
#[derive(Clone)]
pub struct JsFunction {
    pub function: Rc<Function>,
    pub captured_scopes: Vec<Rc<RefCell<JsObject>>>,
}

/// A runtime value.
#[derive(Clone)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(Rc<str>),
    Array(Rc<RefCell<Vec<JsValue>>>),
    Object(Rc<RefCell<JsObject>>),
    Function(JsFunction),
    Native(NativeFn, &'static str),
}

impl JsValue {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        JsValue::String(s.into())
    }

    pub fn array(items: Vec<JsValue>) -> Self {
        JsValue::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object() -> Self {
        JsValue::Object(Rc::new(RefCell::new(JsObject::default())))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, JsValue::Undefined)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, JsValue::Function(_) | JsValue::Native(..))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Null => "null",
            JsValue::Bool(_) => "boolean",
            JsValue::Int(_) | JsValue::Double(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Array(_) => "array",
            JsValue::Object(_) => "object",
            JsValue::Function(_) | JsValue::Native(..) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Bool(b) => *b,
            JsValue::Int(n) => *n != 0,
            JsValue::Double(d) => *d != 0.0 && !d.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            JsValue::Array(_) | JsValue::Object(_) | JsValue::Function(_) | JsValue::Native(..) => {
                true
            }
        }
    }

    /// String conversion as used by `+` and template-ish contexts.
    pub fn to_js_string(&self) -> String {
        match self {
            JsValue::Undefined => "undefined".to_string(),
            JsValue::Null => "null".to_string(),
            JsValue::Bool(b) => b.to_string(),
            JsValue::Int(n) => n.to_string(),
            JsValue::Double(d) => d.to_string(),
            JsValue::String(s) => s.to_string(),
            JsValue::Array(items) => items
                .borrow()
                .iter()
                .map(JsValue::to_js_string)
                .collect::<Vec<_>>()
                .join(","),
            JsValue::Object(_) => "[object Object]".to_string(),
            JsValue::Function(_) | JsValue::Native(..) => "[function]".to_string(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            JsValue::Int(n) => Some(*n as f64),
            JsValue::Double(d) => Some(*d),
            JsValue::Bool(b) => Some(f64::from(u8::from(*b))),
            JsValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Strict (`===`) equality.
    pub fn strict_equals(&self, other: &JsValue) -> bool {
        match (self, other) {
            (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
            (JsValue::Bool(a), JsValue::Bool(b)) => a == b,
            (JsValue::Int(a), JsValue::Int(b)) => a == b,
            (JsValue::Double(a), JsValue::Double(b)) => a == b,
            (JsValue::Int(a), JsValue::Double(b)) | (JsValue::Double(b), JsValue::Int(a)) => {
                (*a as f64) == *b
            }
            (JsValue::String(a), JsValue::String(b)) => a == b,
            (JsValue::Array(a), JsValue::Array(b)) => Rc::ptr_eq(a, b),
            (JsValue::Object(a), JsValue::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Loose (`==`) equality: strict equality extended by number/string
    /// coercion and `null == undefined`.
    pub fn loose_equals(&self, other: &JsValue) -> bool {
        if self.strict_equals(other) {
            return true;
        }
        match (self, other) {
            (JsValue::Undefined | JsValue::Null, JsValue::Undefined | JsValue::Null) => true,
            (JsValue::String(_), JsValue::Int(_) | JsValue::Double(_) | JsValue::Bool(_))
            | (JsValue::Int(_) | JsValue::Double(_) | JsValue::Bool(_), JsValue::String(_))
            | (JsValue::Bool(_), JsValue::Int(_) | JsValue::Double(_))
            | (JsValue::Int(_) | JsValue::Double(_), JsValue::Bool(_)) => {
                match (self.as_number(), other.as_number()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Converts to plain data. Functions convert to `Undefined`.
    pub fn to_variant(&self) -> Variant {
        match self {
            JsValue::Undefined | JsValue::Null | JsValue::Function(_) | JsValue::Native(..) => {
                Variant::Undefined
            }
            JsValue::Bool(b) => Variant::Bool(*b),
            JsValue::Int(n) => Variant::Int(*n),
            JsValue::Double(d) => Variant::Double(*d),
            JsValue::String(s) => Variant::String(s.to_string()),
            JsValue::Array(items) => {
                Variant::List(items.borrow().iter().map(JsValue::to_variant).collect())
            }
            JsValue::Object(obj) => {
                let mut map = BTreeMap::new();
                for (key, value) in obj.borrow().entries() {
                    map.insert(key, value.to_variant());
                }
                Variant::Map(map)
            }
        }
    }

    /// Converts plain data into a runtime value.
    pub fn from_variant(variant: &Variant) -> JsValue {
        match variant {
            Variant::Undefined => JsValue::Undefined,
            Variant::Bool(b) => JsValue::Bool(*b),
            Variant::Int(n) => JsValue::Int(*n),
            Variant::Double(d) => JsValue::Double(*d),
            Variant::String(s) => JsValue::string(s.as_str()),
            Variant::List(items) => {
                JsValue::array(items.iter().map(JsValue::from_variant).collect())
            }
            Variant::Map(map) => {
                let object = JsValue::object();
                if let JsValue::Object(obj) = &object {
                    let mut obj = obj.borrow_mut();
                    for (key, value) in map {
                        obj.set(key.clone(), JsValue::from_variant(value));
                    }
                }
                object
            }
        }
    }
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::String(s) => write!(f, "{s:?}"),
            JsValue::Function(_) => f.write_str("[function]"),
            JsValue::Native(_, name) => write!(f, "[native {name}]"),
            other => f.write_str(&other.to_js_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn variant_round_trip() {
        let variant = Variant::Map(
            [
                ("list".to_string(), Variant::string_list(["a", "b"])),
                ("n".to_string(), Variant::Int(3)),
            ]
            .into_iter()
            .collect(),
        );
        let value = JsValue::from_variant(&variant);
        assert_eq!(value.to_variant(), variant);
    }

    #[test]
    fn equality_semantics() {
        assert!(JsValue::Int(1).loose_equals(&JsValue::string("1")));
        assert!(!JsValue::Int(1).strict_equals(&JsValue::string("1")));
        assert!(JsValue::Null.loose_equals(&JsValue::Undefined));
        assert!(!JsValue::Null.strict_equals(&JsValue::Undefined));
        assert!(JsValue::Int(2).strict_equals(&JsValue::Double(2.0)));
    }

    #[test]
    fn array_identity() {
        let a = JsValue::array(vec![JsValue::Int(1)]);
        let b = JsValue::array(vec![JsValue::Int(1)]);
        assert!(!a.strict_equals(&b));
        assert!(a.strict_equals(&a.clone()));
    }

    #[test]
    fn truthiness() {
        assert!(!JsValue::Undefined.is_truthy());
        assert!(!JsValue::string("").is_truthy());
        assert!(JsValue::array(Vec::new()).is_truthy());
    }
}
