//! The property-value sum type.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::{CodeLocation, FileContextPtr, ItemId, Variant};

/// A property value as stored on an item.
#[derive(Debug)]
pub enum Value {
    /// An unevaluated script expression.
    JsSource(JsSourceValue),
    /// An already-computed value.
    Variant(VariantValue),
    /// A structural reference to a nested item (module prefix or instance).
    Item(ItemId),
}

pub type ValuePtr = Rc<Value>;

impl Value {
    pub fn js_source(value: JsSourceValue) -> ValuePtr {
        Rc::new(Value::JsSource(value))
    }

    pub fn variant(value: Variant) -> ValuePtr {
        Rc::new(Value::Variant(VariantValue::new(value)))
    }

    pub fn variant_set_by_profile(value: Variant) -> ValuePtr {
        Rc::new(Value::Variant(VariantValue {
            set_by_profile: true,
            ..VariantValue::new(value)
        }))
    }

    pub fn item(id: ItemId) -> ValuePtr {
        Rc::new(Value::Item(id))
    }

    pub fn location(&self) -> CodeLocation {
        match self {
            Value::JsSource(v) => v.location.clone(),
            Value::Variant(v) => v.location.clone().unwrap_or_default(),
            Value::Item(_) => CodeLocation::unknown(),
        }
    }

    pub fn as_js_source(&self) -> Option<&JsSourceValue> {
        match self {
            Value::JsSource(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_variant(&self) -> Option<&VariantValue> {
        match self {
            Value::Variant(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_item(&self) -> Option<ItemId> {
        match self {
            Value::Item(id) => Some(*id),
            _ => None,
        }
    }

    /// True for values that never came from an explicit assignment.
    pub fn is_builtin_default(&self) -> bool {
        match self {
            Value::JsSource(v) => v.is_builtin_default,
            Value::Variant(v) => v.is_builtin_default,
            Value::Item(_) => false,
        }
    }
}

/// An unevaluated script expression with its evaluation context.
#[derive(Debug)]
pub struct JsSourceValue {
    /// The raw expression text as written in the file.
    pub source: Rc<str>,
    pub location: CodeLocation,
    /// The file the expression was read from; supplies import and file
    /// scopes during evaluation.
    pub file: FileContextPtr,
    /// The value this one overrides, reachable as `base` in the expression.
    /// Set when prototype inheritance links a derived assignment to the
    /// prototype's.
    pub base: RefCell<Option<ValuePtr>>,
    /// Extra scope item consulted during evaluation. Temporarily retargeted
    /// by the resolver when evaluating exported values in the consumer's
    /// context.
    pub scope: Cell<Option<ItemId>>,
    /// Item on which the same property should be evaluated when the
    /// expression references `outer` (group/alternative overrides).
    pub outer_item: Cell<Option<ItemId>>,
    /// True when the source is a `{ ... }` script block rather than an
    /// expression; evaluation wraps it into an immediately-invoked
    /// function.
    pub has_function_form: bool,
    pub is_builtin_default: bool,
}

impl JsSourceValue {
    pub fn new(source: impl Into<Rc<str>>, location: CodeLocation, file: FileContextPtr) -> Self {
        JsSourceValue {
            source: source.into(),
            location,
            file,
            base: RefCell::new(None),
            scope: Cell::new(None),
            outer_item: Cell::new(None),
            has_function_form: false,
            is_builtin_default: false,
        }
    }

    #[must_use]
    pub fn with_function_form(mut self, has_function_form: bool) -> Self {
        self.has_function_form = has_function_form;
        self
    }

    #[must_use]
    pub fn as_builtin_default(mut self) -> Self {
        self.is_builtin_default = true;
        self
    }

    pub fn source_code(&self) -> &str {
        &self.source
    }

    /// The text handed to the engine: function-form blocks become an
    /// immediately-invoked function so `return` works.
    pub fn source_code_for_evaluation(&self) -> String {
        if self.has_function_form {
            format!("(function(){})()", self.source)
        } else {
            self.source.to_string()
        }
    }

    pub fn set_base(&self, base: Option<ValuePtr>) {
        *self.base.borrow_mut() = base;
    }

    pub fn base_value(&self) -> Option<ValuePtr> {
        self.base.borrow().clone()
    }

    /// Wraps the expression for use as a script function with the given
    /// argument names (prepare scripts, scanners).
    pub fn source_code_as_function(&self, argument_names: &[String]) -> String {
        let args = argument_names.join(",");
        if self.has_function_form {
            format!("(function({args}){})", self.source)
        } else {
            format!("(function({args}){{return {};}})", self.source)
        }
    }
}

/// A computed value, possibly installed from a profile or a declaration
/// default.
#[derive(Clone, Debug)]
pub struct VariantValue {
    pub value: Variant,
    pub location: Option<CodeLocation>,
    /// True when the value came from the active profile rather than the
    /// description file.
    pub set_by_profile: bool,
    pub is_builtin_default: bool,
}

impl VariantValue {
    pub fn new(value: Variant) -> Self {
        VariantValue {
            value,
            location: None,
            set_by_profile: false,
            is_builtin_default: false,
        }
    }

    pub fn builtin_default(value: Variant) -> Self {
        VariantValue {
            is_builtin_default: true,
            ..VariantValue::new(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::FileContext;

    #[test]
    fn base_chain_links() {
        let file = Rc::new(FileContext::new("/f.keel", ""));
        let base = Value::js_source(JsSourceValue::new(
            "[\"A\"]",
            CodeLocation::new("/f.keel", 1, 1),
            Rc::clone(&file),
        ));
        let derived = JsSourceValue::new(
            "base.concat([\"B\"])",
            CodeLocation::new("/f.keel", 2, 1),
            file,
        );
        assert!(derived.base_value().is_none());
        derived.set_base(Some(Rc::clone(&base)));
        let linked = derived.base_value().unwrap();
        assert_eq!(linked.as_js_source().unwrap().source_code(), "[\"A\"]");
    }

    #[test]
    fn function_wrapping() {
        let file = Rc::new(FileContext::new("/f.keel", ""));
        let v = JsSourceValue::new("input.fileName", CodeLocation::unknown(), file);
        assert_eq!(
            v.source_code_as_function(&["input".to_string(), "output".to_string()]),
            "(function(input,output){return input.fileName;})"
        );
    }

    #[test]
    fn builtin_default_flag() {
        let v = Rc::new(Value::Variant(VariantValue::builtin_default(Variant::Bool(true))));
        assert!(v.is_builtin_default());
        let v = Value::variant(Variant::Bool(true));
        assert!(!v.is_builtin_default());
    }
}
