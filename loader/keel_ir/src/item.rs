//! Items: nodes of the parsed declarative tree.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::{
    CodeLocation, FileContextPtr, ItemId, ItemPool, ItemType, JsSourceValue, PropertyDeclaration,
    QualifiedId, Value, ValuePtr, Variant, VariantValue,
};

/// A resolved module dependency attached to a product or group item.
#[derive(Clone, Debug)]
pub struct ItemModule {
    pub name: QualifiedId,
    /// The instantiated module item.
    pub item: ItemId,
    /// Set when the "module" is another product's export surface; points at
    /// the exporting product's item.
    pub product_item: Option<ItemId>,
    /// Parameters the consumer set on the `Depends` item (a map variant).
    pub parameters: Variant,
    pub required: bool,
    pub limit_to_sub_project: bool,
}

/// The data of one item. Accessed through the [`Item`] handle.
#[derive(Debug)]
pub struct ItemData {
    typ: ItemType,
    location: CodeLocation,
    id_string: String,
    prototype: Option<ItemId>,
    scope: Option<ItemId>,
    parent: Option<ItemId>,
    children: Vec<ItemId>,
    properties: FxHashMap<String, ValuePtr>,
    /// Property names in first-assignment order; keeps evaluation and
    /// resolution deterministic.
    property_order: Vec<String>,
    declarations: FxHashMap<String, PropertyDeclaration>,
    modules: Vec<ItemModule>,
    file: Option<FileContextPtr>,
    /// Bumped on every property mutation; the evaluator compares
    /// generations to drop stale cache entries.
    generation: Cell<u64>,
}

impl ItemData {
    pub(crate) fn new(typ: ItemType) -> Self {
        ItemData {
            typ,
            location: CodeLocation::unknown(),
            id_string: String::new(),
            prototype: None,
            scope: None,
            parent: None,
            children: Vec::new(),
            properties: FxHashMap::default(),
            property_order: Vec::new(),
            declarations: FxHashMap::default(),
            modules: Vec::new(),
            file: None,
            generation: Cell::new(0),
        }
    }
}

/// Handle to an item. Cheap to clone; all methods borrow the node only for
/// the duration of the call.
#[derive(Clone)]
pub struct Item {
    id: ItemId,
    data: Rc<RefCell<ItemData>>,
}

impl Item {
    pub(crate) fn from_parts(id: ItemId, data: Rc<RefCell<ItemData>>) -> Self {
        Item { id, data }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn item_type(&self) -> ItemType {
        self.data.borrow().typ
    }

    pub fn set_item_type(&self, typ: ItemType) {
        self.data.borrow_mut().typ = typ;
    }

    pub fn type_name(&self) -> String {
        let typ = self.item_type();
        typ.name().map_or_else(|| format!("{typ:?}"), str::to_string)
    }

    pub fn location(&self) -> CodeLocation {
        self.data.borrow().location.clone()
    }

    pub fn set_location(&self, location: CodeLocation) {
        self.data.borrow_mut().location = location;
    }

    /// The source-level `id:` of the item ("" when absent).
    pub fn id_string(&self) -> String {
        self.data.borrow().id_string.clone()
    }

    pub fn set_id_string(&self, id: impl Into<String>) {
        self.data.borrow_mut().id_string = id.into();
    }

    pub fn prototype(&self) -> Option<ItemId> {
        self.data.borrow().prototype
    }

    pub fn set_prototype(&self, prototype: Option<ItemId>) {
        self.data.borrow_mut().prototype = prototype;
    }

    pub fn scope(&self) -> Option<ItemId> {
        self.data.borrow().scope
    }

    pub fn set_scope(&self, scope: Option<ItemId>) {
        self.data.borrow_mut().scope = scope;
    }

    pub fn parent(&self) -> Option<ItemId> {
        self.data.borrow().parent
    }

    pub fn set_parent(&self, parent: Option<ItemId>) {
        self.data.borrow_mut().parent = parent;
    }

    pub fn children(&self) -> Vec<ItemId> {
        self.data.borrow().children.clone()
    }

    pub fn add_child(&self, child: &Item) {
        self.data.borrow_mut().children.push(child.id());
        child.set_parent(Some(self.id));
    }

    pub fn set_children(&self, children: Vec<ItemId>) {
        self.data.borrow_mut().children = children;
    }

    pub fn file(&self) -> Option<FileContextPtr> {
        self.data.borrow().file.clone()
    }

    pub fn set_file(&self, file: FileContextPtr) {
        self.data.borrow_mut().file = Some(file);
    }

    pub fn generation(&self) -> u64 {
        self.data.borrow().generation.get()
    }

    fn bump_generation(data: &ItemData) {
        data.generation.set(data.generation.get() + 1);
    }

    // Own properties

    pub fn has_own_property(&self, name: &str) -> bool {
        self.data.borrow().properties.contains_key(name)
    }

    pub fn own_property(&self, name: &str) -> Option<ValuePtr> {
        self.data.borrow().properties.get(name).cloned()
    }

    pub fn set_property(&self, name: impl Into<String>, value: ValuePtr) {
        let name = name.into();
        let mut data = self.data.borrow_mut();
        Self::bump_generation(&data);
        if data.properties.insert(name.clone(), value).is_none() {
            data.property_order.push(name);
        }
    }

    pub fn remove_property(&self, name: &str) {
        let mut data = self.data.borrow_mut();
        if data.properties.remove(name).is_some() {
            data.property_order.retain(|n| n != name);
        }
        Self::bump_generation(&data);
    }

    /// Property names in first-assignment order.
    pub fn property_names(&self) -> Vec<String> {
        self.data.borrow().property_order.clone()
    }

    /// `(name, value)` pairs in first-assignment order.
    pub fn properties(&self) -> Vec<(String, ValuePtr)> {
        let data = self.data.borrow();
        data.property_order
            .iter()
            .filter_map(|name| data.properties.get(name).map(|v| (name.clone(), Rc::clone(v))))
            .collect()
    }

    // Declarations

    pub fn own_property_declaration(&self, name: &str) -> Option<PropertyDeclaration> {
        self.data.borrow().declarations.get(name).cloned()
    }

    pub fn set_property_declaration(&self, decl: PropertyDeclaration) {
        let mut data = self.data.borrow_mut();
        data.declarations.insert(decl.name.clone(), decl);
    }

    pub fn set_property_declarations(&self, decls: Vec<PropertyDeclaration>) {
        let mut data = self.data.borrow_mut();
        for decl in decls {
            data.declarations.insert(decl.name.clone(), decl);
        }
    }

    pub fn property_declarations(&self) -> Vec<PropertyDeclaration> {
        let mut decls: Vec<PropertyDeclaration> =
            self.data.borrow().declarations.values().cloned().collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    // Modules

    pub fn modules(&self) -> Vec<ItemModule> {
        self.data.borrow().modules.clone()
    }

    pub fn add_module(&self, module: ItemModule) {
        self.data.borrow_mut().modules.push(module);
    }

    pub fn set_modules(&self, modules: Vec<ItemModule>) {
        self.data.borrow_mut().modules = modules;
    }

    /// Module instances carry `present: false` when their dependency could
    /// not be satisfied but was not required.
    pub fn is_present_module(&self) -> bool {
        match self.own_property("present") {
            Some(value) => value.as_variant().map_or(true, |v| v.value.to_bool()),
            None => true,
        }
    }

    // Prototype-chain lookups

    /// The effective value of a property, searching the prototype chain.
    pub fn property(&self, pool: &ItemPool, name: &str) -> Option<ValuePtr> {
        let mut current = self.clone();
        loop {
            if let Some(value) = current.own_property(name) {
                return Some(value);
            }
            match current.prototype() {
                Some(proto) => current = pool.get(proto),
                None => return None,
            }
        }
    }

    /// The effective declaration of a property, searching the prototype
    /// chain.
    pub fn property_declaration(&self, pool: &ItemPool, name: &str) -> Option<PropertyDeclaration> {
        let mut current = self.clone();
        loop {
            if let Some(decl) = current.own_property_declaration(name) {
                return Some(decl);
            }
            match current.prototype() {
                Some(proto) => current = pool.get(proto),
                None => return None,
            }
        }
    }

    /// True if the property is declared anywhere on the prototype chain.
    pub fn has_property(&self, pool: &ItemPool, name: &str) -> bool {
        self.property_declaration(pool, name).is_some() || self.property(pool, name).is_some()
    }

    /// The effective value if it is a script source.
    pub fn source_property(&self, pool: &ItemPool, name: &str) -> Option<ValuePtr> {
        self.property(pool, name)
            .filter(|v| v.as_js_source().is_some())
    }

    /// The effective value if it is a computed variant.
    pub fn variant_property(&self, pool: &ItemPool, name: &str) -> Option<VariantValue> {
        self.property(pool, name)
            .and_then(|v| v.as_variant().cloned())
    }

    /// The effective value if it is a nested-item reference.
    pub fn item_property(&self, pool: &ItemPool, name: &str) -> Option<ItemId> {
        self.property(pool, name).and_then(|v| v.as_item())
    }

    /// The last item of the prototype chain.
    pub fn root_prototype(&self, pool: &ItemPool) -> ItemId {
        let mut current = self.clone();
        while let Some(proto) = current.prototype() {
            current = pool.get(proto);
        }
        current.id()
    }

    /// First child with the given type tag, if any.
    pub fn child_of_type(&self, pool: &ItemPool, typ: ItemType) -> Option<Item> {
        self.children()
            .into_iter()
            .map(|id| pool.get(id))
            .find(|child| child.item_type() == typ)
    }

    /// Installs declaration defaults for every declared property that has an
    /// initial value and no assignment yet.
    pub fn setup_builtin_defaults(&self) {
        let decls = self.property_declarations();
        for decl in decls {
            if let Some(default) = &decl.initial_value {
                if !self.has_own_property(&decl.name) {
                    self.set_property(
                        decl.name.clone(),
                        Rc::new(Value::Variant(VariantValue::builtin_default(default.clone()))),
                    );
                }
            }
        }
    }

    /// Convenience: assign a plain computed value.
    pub fn set_variant_property(&self, name: impl Into<String>, value: Variant) {
        self.set_property(name, Value::variant(value));
    }

    /// Convenience: assign a script source.
    pub fn set_source_property(&self, name: impl Into<String>, value: JsSourceValue) {
        self.set_property(name, Value::js_source(value));
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Item({:?}, {})", self.id, self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pool() -> ItemPool {
        ItemPool::new()
    }

    #[test]
    fn property_order_is_first_assignment_order() {
        let pool = pool();
        let item = pool.create(ItemType::Product);
        item.set_variant_property("b", Variant::Int(1));
        item.set_variant_property("a", Variant::Int(2));
        item.set_variant_property("b", Variant::Int(3));
        assert_eq!(item.property_names(), vec!["b", "a"]);
    }

    #[test]
    fn prototype_chain_lookup() {
        let pool = pool();
        let proto = pool.create(ItemType::Module);
        proto.set_variant_property("version", Variant::string("1.0"));
        let instance = pool.create(ItemType::ModuleInstancePlaceholder);
        instance.set_prototype(Some(proto.id()));

        let value = instance.property(&pool, "version").unwrap();
        assert_eq!(
            value.as_variant().unwrap().value,
            Variant::string("1.0")
        );
        assert!(instance.own_property("version").is_none());
        assert_eq!(instance.root_prototype(&pool), proto.id());
    }

    #[test]
    fn mutation_bumps_generation() {
        let pool = pool();
        let item = pool.create(ItemType::Product);
        let before = item.generation();
        item.set_variant_property("name", Variant::string("app"));
        assert!(item.generation() > before);
        let before = item.generation();
        item.remove_property("name");
        assert!(item.generation() > before);
    }

    #[test]
    fn present_module_flag() {
        let pool = pool();
        let module = pool.create(ItemType::ModuleInstancePlaceholder);
        assert!(module.is_present_module());
        module.set_variant_property("present", Variant::Bool(false));
        assert!(!module.is_present_module());
    }

    #[test]
    fn builtin_defaults_do_not_override_assignments() {
        let pool = pool();
        let item = pool.create(ItemType::Rule);
        item.set_property_declaration(
            PropertyDeclaration::new("multiplex", crate::PropertyType::Boolean)
                .with_default(Variant::Bool(false)),
        );
        item.set_variant_property("multiplex", Variant::Bool(true));
        item.setup_builtin_defaults();
        let value = item.own_property("multiplex").unwrap();
        assert_eq!(value.as_variant().unwrap().value, Variant::Bool(true));
        assert!(!value.is_builtin_default());
    }

    #[test]
    fn children_track_parents() {
        let pool = pool();
        let parent = pool.create(ItemType::Project);
        let child = pool.create(ItemType::Product);
        parent.add_child(&child);
        assert_eq!(child.parent(), Some(parent.id()));
        assert_eq!(parent.children(), vec![child.id()]);
    }
}
