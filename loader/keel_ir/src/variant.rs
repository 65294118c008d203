//! Plain computed property data.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// An already-computed property value.
///
/// Maps use `BTreeMap` so iteration order, literal rendering and the derived
/// config hash are deterministic across runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    Undefined,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<Variant>),
    Map(BTreeMap<String, Variant>),
}

impl Variant {
    pub fn string(s: impl Into<String>) -> Self {
        Variant::String(s.into())
    }

    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Variant::List(items.into_iter().map(|s| Variant::String(s.into())).collect())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Variant::Undefined)
    }

    /// Truthiness following script semantics: `undefined`, `false`, `0`,
    /// `NaN` and the empty string are falsy; lists and maps are always truthy.
    pub fn to_bool(&self) -> bool {
        match self {
            Variant::Undefined => false,
            Variant::Bool(b) => *b,
            Variant::Int(n) => *n != 0,
            Variant::Double(d) => *d != 0.0 && !d.is_nan(),
            Variant::String(s) => !s.is_empty(),
            Variant::List(_) | Variant::Map(_) => true,
        }
    }

    /// String conversion; `Undefined` converts to the empty string.
    pub fn to_display_string(&self) -> String {
        match self {
            Variant::Undefined => String::new(),
            Variant::Bool(b) => b.to_string(),
            Variant::Int(n) => n.to_string(),
            Variant::Double(d) => d.to_string(),
            Variant::String(s) => s.clone(),
            Variant::List(_) | Variant::Map(_) => self.to_literal(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_int(&self) -> i64 {
        match self {
            Variant::Int(n) => *n,
            Variant::Double(d) => *d as i64,
            Variant::Bool(b) => i64::from(*b),
            Variant::String(s) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Conversion to a string list: scalars become a single-element list,
    /// `Undefined` the empty list.
    pub fn to_string_list(&self) -> Vec<String> {
        match self {
            Variant::Undefined => Vec::new(),
            Variant::List(items) => items
                .iter()
                .filter(|v| !v.is_undefined())
                .map(Variant::to_display_string)
                .collect(),
            other => vec![other.to_display_string()],
        }
    }

    pub fn to_list(&self) -> Vec<Variant> {
        match self {
            Variant::Undefined => Vec::new(),
            Variant::List(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Variant>> {
        match self {
            Variant::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, Variant> {
        self.as_map().cloned().unwrap_or_default()
    }

    /// Looks up `key` in a map variant; `Undefined` for everything else.
    pub fn map_value(&self, key: &str) -> Variant {
        match self {
            Variant::Map(m) => m.get(key).cloned().unwrap_or_default(),
            _ => Variant::Undefined,
        }
    }

    /// Renders the value as a script literal. Used for provider config
    /// hashing and for exported-module source generation, so the rendering
    /// must be stable.
    pub fn to_literal(&self) -> String {
        let mut out = String::new();
        self.write_literal(&mut out);
        out
    }

    fn write_literal(&self, out: &mut String) {
        match self {
            Variant::Undefined => out.push_str("undefined"),
            Variant::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            Variant::Int(n) => {
                let _ = write!(out, "{n}");
            }
            Variant::Double(d) => {
                let _ = write!(out, "{d}");
            }
            Variant::String(s) => write_string_literal(out, s),
            Variant::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_literal(out);
                }
                out.push(']');
            }
            Variant::Map(map) => {
                out.push('{');
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_string_literal(out, key);
                    out.push_str(": ");
                    value.write_literal(out);
                }
                out.push('}');
            }
        }
    }

    /// A short stable hash of the literal rendering, used to derive
    /// per-config output directories for module providers.
    pub fn config_hash(&self) -> String {
        // FNV-1a over the literal text; only stability matters here.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.to_literal().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        format!("{hash:016x}")
    }
}

fn write_string_literal(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_literal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn truthiness() {
        assert!(!Variant::Undefined.to_bool());
        assert!(!Variant::Bool(false).to_bool());
        assert!(!Variant::Int(0).to_bool());
        assert!(!Variant::string("").to_bool());
        assert!(Variant::string("x").to_bool());
        assert!(Variant::List(Vec::new()).to_bool());
    }

    #[test]
    fn string_list_conversion() {
        assert_eq!(Variant::Undefined.to_string_list(), Vec::<String>::new());
        assert_eq!(Variant::string("a").to_string_list(), vec!["a".to_string()]);
        assert_eq!(
            Variant::string_list(["a", "b"]).to_string_list(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn literal_rendering_is_stable() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), Variant::Int(2));
        map.insert("a".to_string(), Variant::string_list(["x"]));
        let v = Variant::Map(map);
        assert_eq!(v.to_literal(), r#"{"a": ["x"], "b": 2}"#);
        assert_eq!(v.config_hash(), v.clone().config_hash());
    }

    #[test]
    fn string_literal_escaping() {
        let v = Variant::string("a\"b\\c\nd");
        assert_eq!(v.to_literal(), "\"a\\\"b\\\\c\\nd\"");
    }

    #[test]
    fn map_value_lookup() {
        let mut map = BTreeMap::new();
        map.insert("k".to_string(), Variant::Int(1));
        let v = Variant::Map(map);
        assert_eq!(v.map_value("k"), Variant::Int(1));
        assert_eq!(v.map_value("missing"), Variant::Undefined);
        assert_eq!(Variant::Int(3).map_value("k"), Variant::Undefined);
    }
}
