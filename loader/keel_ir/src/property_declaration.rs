//! Property declarations: the declared type, flags and allowed values of a
//! property, plus coercion of computed values to the declared type.

use crate::fileinfo;
use crate::Variant;

/// The declared type of a property.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PropertyType {
    #[default]
    Unknown,
    Boolean,
    Integer,
    Path,
    PathList,
    String,
    StringList,
    Variant,
    VariantList,
}

impl PropertyType {
    pub fn from_name(name: &str) -> Option<PropertyType> {
        Some(match name {
            "bool" => PropertyType::Boolean,
            "int" => PropertyType::Integer,
            "path" => PropertyType::Path,
            "pathList" => PropertyType::PathList,
            "string" => PropertyType::String,
            "stringList" => PropertyType::StringList,
            "var" | "variant" => PropertyType::Variant,
            "varList" => PropertyType::VariantList,
            _ => return None,
        })
    }

    /// Scalar types keep `Undefined` as-is on conversion; non-scalar unset
    /// values become the empty list.
    pub fn is_scalar(self) -> bool {
        !matches!(
            self,
            PropertyType::PathList | PropertyType::StringList | PropertyType::VariantList
        )
    }
}

/// Behavior flags attached to a declaration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeclFlags {
    /// The property never lands in the resolved configuration maps
    /// (scripts, internal bookkeeping).
    pub not_available_in_config: bool,
}

/// A property declaration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyDeclaration {
    pub name: String,
    pub typ: PropertyType,
    pub flags: DeclFlags,
    pub allowed_values: Vec<String>,
    /// Argument names bound when the property's source is wrapped into a
    /// callable script function (`prepare`, `scan`, ...).
    pub function_argument_names: Vec<String>,
    /// Built-in default installed when the item carries no assignment.
    pub initial_value: Option<Variant>,
    /// Built-in default expressed as a script expression (e.g. `targetName`
    /// defaulting to `name`); installed by the reader with the item's file
    /// context.
    pub initial_source: Option<String>,
}

impl PropertyDeclaration {
    pub fn new(name: impl Into<String>, typ: PropertyType) -> Self {
        PropertyDeclaration {
            name: name.into(),
            typ,
            ..PropertyDeclaration::default()
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: Variant) -> Self {
        self.initial_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_source_default(mut self, source: impl Into<String>) -> Self {
        self.initial_source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.function_argument_names = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn not_in_config(mut self) -> Self {
        self.flags.not_available_in_config = true;
        self
    }

    pub fn is_scalar(&self) -> bool {
        self.typ.is_scalar()
    }
}

/// Coerces a computed value to a declared type.
///
/// `base_dir`, when non-empty, is prepended to relative `Path`/`PathList`
/// entries (the path-properties base dir of the evaluator cache scope).
pub fn convert_to_property_type(value: &Variant, typ: PropertyType, base_dir: &str) -> Variant {
    if value.is_undefined() {
        return if typ.is_scalar() {
            Variant::Undefined
        } else {
            Variant::List(Vec::new())
        };
    }
    match typ {
        PropertyType::Unknown | PropertyType::Variant => value.clone(),
        PropertyType::Boolean => Variant::Bool(value.to_bool()),
        PropertyType::Integer => Variant::Int(value.to_int()),
        PropertyType::String => Variant::String(value.to_display_string()),
        PropertyType::Path => Variant::String(resolve_path(base_dir, &value.to_display_string())),
        PropertyType::StringList => Variant::string_list(value.to_string_list()),
        PropertyType::PathList => Variant::List(
            value
                .to_string_list()
                .into_iter()
                .map(|p| Variant::String(resolve_path(base_dir, &p)))
                .collect(),
        ),
        PropertyType::VariantList => Variant::List(value.to_list()),
    }
}

fn resolve_path(base_dir: &str, path: &str) -> String {
    if base_dir.is_empty() {
        path.to_string()
    } else {
        fileinfo::resolve_path(base_dir, path)
    }
}
