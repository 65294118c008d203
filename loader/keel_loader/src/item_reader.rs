//! Reads description files into item trees.
//!
//! Responsible for the QML-style inheritance semantics: a file whose root
//! is `B { ... }` with `B` non-builtin gets the item from
//! `<searchPath>/imports/B.keel` as its prototype, and `base` inside an
//! overriding expression refers to the prototype's value of the same
//! property.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use keel_diagnostic::{ErrorInfo, Result};
use keel_ir::{
    fileinfo, BuiltinDeclarations, CodeLocation, FileContext, FileContextPtr, Item, ItemPool,
    ItemType, JsSourceValue, PropertyDeclaration, PropertyType, Value,
};
use keel_parse::{AstFile, AstImport, AstItem, AstMember};

struct ParsedFile {
    ast: Rc<AstFile>,
    context: FileContextPtr,
}

/// Reads `.keel` files and creates item trees, with inheritance applied.
///
/// Each `read_file` call instantiates a fresh tree (module prototypes are
/// mutated per profile by the module loader, so instances must not be
/// shared), but parsing is cached per path.
pub struct ItemReader {
    pool: Rc<ItemPool>,
    builtins: Rc<BuiltinDeclarations>,
    search_paths: RefCell<Vec<String>>,
    extra_search_paths: RefCell<Vec<Vec<String>>>,
    parse_cache: RefCell<FxHashMap<String, Rc<ParsedFile>>>,
    files_read: RefCell<BTreeSet<String>>,
}

impl ItemReader {
    pub fn new(pool: Rc<ItemPool>) -> Self {
        ItemReader {
            pool,
            builtins: Rc::new(BuiltinDeclarations::new()),
            search_paths: RefCell::new(Vec::new()),
            extra_search_paths: RefCell::new(Vec::new()),
            parse_cache: RefCell::new(FxHashMap::default()),
            files_read: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn pool(&self) -> &Rc<ItemPool> {
        &self.pool
    }

    pub fn builtins(&self) -> &BuiltinDeclarations {
        &self.builtins
    }

    pub fn set_search_paths(&self, paths: Vec<String>) {
        *self.search_paths.borrow_mut() = paths;
    }

    /// Extends the search paths; a later [`Self::pop_extra_search_paths`]
    /// strictly undoes the push.
    pub fn push_extra_search_paths(&self, paths: Vec<String>) {
        self.extra_search_paths.borrow_mut().push(paths);
    }

    pub fn pop_extra_search_paths(&self) {
        self.extra_search_paths.borrow_mut().pop();
    }

    pub fn extra_search_paths_depth(&self) -> usize {
        self.extra_search_paths.borrow().len()
    }

    /// Caller-supplied search paths first, then the extra stack from the
    /// top down.
    pub fn all_search_paths(&self) -> Vec<String> {
        let mut paths = self.search_paths.borrow().clone();
        for extra in self.extra_search_paths.borrow().iter().rev() {
            paths.extend(extra.iter().cloned());
        }
        paths
    }

    /// Every file this reader has touched.
    pub fn files_read(&self) -> Vec<String> {
        self.files_read.borrow().iter().cloned().collect()
    }

    /// Reads a description file into a fresh item tree.
    pub fn read_file(&self, file_path: &str) -> Result<Item> {
        let mut inheritance_chain = Vec::new();
        self.read_file_internal(file_path, &mut inheritance_chain)
    }

    fn read_file_internal(&self, file_path: &str, inheritance_chain: &mut Vec<String>) -> Result<Item> {
        let file_path = fileinfo::clean_path(file_path);
        if inheritance_chain.iter().any(|entry| *entry == file_path) {
            inheritance_chain.push(file_path.clone());
            return Err(ErrorInfo::resolve(
                format!(
                    "Cyclic inheritance detected: {}.",
                    inheritance_chain.join(" -> ")
                ),
                CodeLocation::file_only(&file_path),
            ));
        }
        inheritance_chain.push(file_path.clone());
        let parsed = self.parse(&file_path)?;
        let item = self.instantiate(&parsed.ast.root, &parsed.context, inheritance_chain)?;
        inheritance_chain.pop();
        Ok(item)
    }

    fn parse(&self, file_path: &str) -> Result<Rc<ParsedFile>> {
        if let Some(parsed) = self.parse_cache.borrow().get(file_path) {
            return Ok(Rc::clone(parsed));
        }
        debug!(file = file_path, "reading description file");
        let source = std::fs::read_to_string(file_path).map_err(|error| {
            ErrorInfo::resolve(
                format!("Cannot read file '{file_path}': {error}."),
                CodeLocation::file_only(file_path),
            )
        })?;
        self.files_read.borrow_mut().insert(file_path.to_string());
        let ast = keel_parse::parse_file(&source, file_path)?;
        let context = self.build_file_context(file_path, source, &ast)?;
        let parsed = Rc::new(ParsedFile {
            ast: Rc::new(ast),
            context,
        });
        self.parse_cache
            .borrow_mut()
            .insert(file_path.to_string(), Rc::clone(&parsed));
        Ok(parsed)
    }

    fn build_file_context(
        &self,
        file_path: &str,
        source: String,
        ast: &AstFile,
    ) -> Result<FileContextPtr> {
        let mut context = FileContext::new(file_path, source);
        context.search_paths = self.all_search_paths();
        for import in &ast.imports {
            match import {
                AstImport::Extension { name, location } => {
                    if !keel_js::extension_names().contains(&name.as_str()) {
                        return Err(ErrorInfo::resolve(
                            format!("Unknown extension 'keel.{name}'."),
                            location.clone(),
                        ));
                    }
                    context
                        .extension_imports
                        .push((name.clone(), location.clone()));
                }
                AstImport::File {
                    path,
                    alias,
                    location,
                } => {
                    let resolved = fileinfo::resolve_path(&context.dir_path, path);
                    let file_paths = self.resolve_script_import(&resolved, location)?;
                    context.js_imports.push(keel_ir::JsImport {
                        scope_name: alias.clone(),
                        file_paths,
                        location: location.clone(),
                    });
                }
            }
        }
        Ok(Rc::new(context))
    }

    fn resolve_script_import(
        &self,
        resolved: &str,
        location: &CodeLocation,
    ) -> Result<Vec<String>> {
        let path = std::path::Path::new(resolved);
        if path.is_dir() {
            let mut scripts: Vec<String> = std::fs::read_dir(path)
                .map_err(|error| {
                    ErrorInfo::resolve(
                        format!("Cannot read import directory '{resolved}': {error}."),
                        location.clone(),
                    )
                })?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path().to_string_lossy().replace('\\', "/"))
                .filter(|name| name.ends_with(".js"))
                .collect();
            scripts.sort();
            if scripts.is_empty() {
                return Err(ErrorInfo::resolve(
                    format!("Import directory '{resolved}' contains no scripts."),
                    location.clone(),
                ));
            }
            return Ok(scripts);
        }
        if !path.is_file() {
            return Err(ErrorInfo::resolve(
                format!("Imported file '{resolved}' does not exist."),
                location.clone(),
            ));
        }
        Ok(vec![resolved.to_string()])
    }

    fn instantiate(
        &self,
        ast: &AstItem,
        context: &FileContextPtr,
        inheritance_chain: &mut Vec<String>,
    ) -> Result<Item> {
        let (item, prototype) = match ItemType::from_name(&ast.type_name) {
            Some(typ) => {
                let item = self.pool.create(typ);
                item.set_property_declarations(self.builtins.declarations_for(typ).to_vec());
                (item, None)
            }
            None => {
                let prototype = self.load_prototype(ast, inheritance_chain)?;
                let item = self.pool.create(prototype.item_type());
                item.set_prototype(Some(prototype.id()));
                (item, Some(prototype))
            }
        };
        item.set_location(ast.location.clone());
        item.set_file(Rc::clone(context));

        for member in &ast.members {
            match member {
                AstMember::Id { name, .. } => item.set_id_string(name.clone()),
                AstMember::Declaration(decl) => {
                    let typ = PropertyType::from_name(&decl.type_name).ok_or_else(|| {
                        ErrorInfo::resolve(
                            format!("Unknown property type '{}'.", decl.type_name),
                            decl.location.clone(),
                        )
                    })?;
                    item.set_property_declaration(PropertyDeclaration::new(decl.name.clone(), typ));
                    if let Some(source) = &decl.source {
                        item.set_source_property(
                            decl.name.clone(),
                            JsSourceValue::new(
                                source.as_str(),
                                decl.source_location.clone(),
                                Rc::clone(context),
                            ),
                        );
                    }
                }
                AstMember::Assignment(assignment) => {
                    let value = JsSourceValue::new(
                        assignment.source.as_str(),
                        assignment.source_location.clone(),
                        Rc::clone(context),
                    )
                    .with_function_form(assignment.has_function_form);
                    if assignment.name_parts.len() == 1 {
                        item.set_source_property(assignment.name_parts[0].clone(), value);
                    } else {
                        let container = self.nested_container(&item, &assignment.name_parts, context);
                        container.set_source_property(
                            assignment.name_parts[assignment.name_parts.len() - 1].clone(),
                            value,
                        );
                    }
                }
                AstMember::Child(child_ast) => {
                    let child = self.instantiate(child_ast, context, inheritance_chain)?;
                    item.add_child(&child);
                }
            }
        }

        if let Some(prototype) = prototype {
            self.merge_prototype(&item, &prototype);
        }
        self.install_builtin_defaults(&item, context);
        Ok(item)
    }

    /// Creates (or reuses) the nested item chain for a dotted assignment
    /// `a.b.c: v`; intermediates are module prefixes, the final container a
    /// module-instance placeholder.
    fn nested_container(&self, item: &Item, name_parts: &[String], context: &FileContextPtr) -> Item {
        let mut current = item.clone();
        let containers = &name_parts[..name_parts.len() - 1];
        for (idx, part) in containers.iter().enumerate() {
            let is_last = idx == containers.len() - 1;
            if let Some(existing) = current.own_property(part).and_then(|v| v.as_item()) {
                current = self.pool.get(existing);
                if is_last && current.item_type() == ItemType::ModulePrefix {
                    current.set_item_type(ItemType::ModuleInstancePlaceholder);
                }
                continue;
            }
            let typ = if is_last {
                ItemType::ModuleInstancePlaceholder
            } else {
                ItemType::ModulePrefix
            };
            let nested = self.pool.create(typ);
            nested.set_location(current.location());
            nested.set_file(Rc::clone(context));
            current.set_property(part.clone(), Value::item(nested.id()));
            current = nested;
        }
        current
    }

    /// Wires a derived item to its prototype: adopts the prototype's
    /// children and links overriding values to the prototype's via `base`.
    fn merge_prototype(&self, item: &Item, prototype: &Item) {
        let mut children = prototype.children();
        prototype.set_children(Vec::new());
        for child_id in &children {
            self.pool.get(*child_id).set_parent(Some(item.id()));
        }
        children.extend(item.children());
        item.set_children(children);

        for (name, value) in item.properties() {
            if let Value::JsSource(source) = &*value {
                if let Some(base) = prototype.property(&self.pool, &name) {
                    source.set_base(Some(base));
                }
            }
        }
    }

    /// Installs declaration defaults for declared properties that have no
    /// assignment anywhere on the prototype chain.
    fn install_builtin_defaults(&self, item: &Item, context: &FileContextPtr) {
        let mut decls: Vec<PropertyDeclaration> = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = Some(item.clone());
        while let Some(node) = current {
            for decl in node.property_declarations() {
                if seen.insert(decl.name.clone()) {
                    decls.push(decl);
                }
            }
            current = node.prototype().map(|id| self.pool.get(id));
        }
        for decl in decls {
            if item.property(&self.pool, &decl.name).is_some() {
                continue;
            }
            if let Some(default) = &decl.initial_value {
                item.set_property(
                    decl.name.clone(),
                    Rc::new(Value::Variant(keel_ir::VariantValue::builtin_default(
                        default.clone(),
                    ))),
                );
            } else if let Some(source) = &decl.initial_source {
                item.set_source_property(
                    decl.name.clone(),
                    JsSourceValue::new(
                        source.as_str(),
                        item.location(),
                        Rc::clone(context),
                    )
                    .as_builtin_default(),
                );
            } else {
                // Declared properties always carry a value, so probe
                // bindings and was-set queries see every declaration.
                item.set_property(
                    decl.name.clone(),
                    Rc::new(Value::Variant(keel_ir::VariantValue::builtin_default(
                        keel_ir::Variant::Undefined,
                    ))),
                );
            }
        }
    }

    /// Links a prototype to an already-instantiated item (used for
    /// synthesized instances such as transient provider items): own
    /// declaration defaults that would shadow prototype values are
    /// dropped, the prototype's children adopted, and `base` chains wired.
    pub(crate) fn link_prototype(&self, item: &Item, prototype: &Item) {
        for (name, value) in item.properties() {
            if value.is_builtin_default()
                && prototype
                    .property(&self.pool, &name)
                    .is_some_and(|proto_value| !proto_value.is_builtin_default())
            {
                item.remove_property(&name);
            }
        }
        item.set_prototype(Some(prototype.id()));
        self.merge_prototype(item, prototype);
        if let Some(context) = item.file() {
            self.install_builtin_defaults(item, &context);
        }
    }

    fn load_prototype(&self, ast: &AstItem, inheritance_chain: &mut Vec<String>) -> Result<Item> {
        for search_path in self.all_search_paths() {
            let candidate = format!("{search_path}/imports/{}.keel", ast.type_name);
            if std::path::Path::new(&candidate).is_file() {
                return self.read_file_internal(&candidate, inheritance_chain);
            }
        }
        Err(ErrorInfo::resolve(
            format!("Unknown item type '{}'.", ast.type_name),
            ast.location.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: String,
        reader: ItemReader,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().replace('\\', "/");
        let reader = ItemReader::new(Rc::new(ItemPool::new()));
        reader.set_search_paths(vec![root.clone()]);
        Fixture {
            _dir: dir,
            root,
            reader,
        }
    }

    fn write(fixture: &Fixture, relative: &str, content: &str) -> String {
        let path = format!("{}/{relative}", fixture.root);
        let as_path = std::path::Path::new(&path);
        if let Some(parent) = as_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(as_path, content).unwrap();
        path
    }

    #[test]
    fn reads_builtin_typed_items() {
        let fixture = fixture();
        let path = write(
            &fixture,
            "p.keel",
            "Product {\n    name: \"app\"\n    Group {\n        files: [\"a.c\"]\n    }\n}\n",
        );
        let item = fixture.reader.read_file(&path).unwrap();
        assert_eq!(item.item_type(), ItemType::Product);
        assert_eq!(item.children().len(), 1);
        assert!(item.own_property("name").is_some());
        // Builtin defaults are installed for unset declarations.
        let condition = item.own_property("condition").unwrap();
        assert!(condition.is_builtin_default());
        assert!(fixture.reader.files_read().contains(&path));
    }

    #[test]
    fn inheritance_links_prototype_and_base() {
        let fixture = fixture();
        write(
            &fixture,
            "imports/MyApp.keel",
            "Product {\n    type: [\"application\"]\n    property stringList tags: [\"base\"]\n}\n",
        );
        let path = write(
            &fixture,
            "p.keel",
            "MyApp {\n    name: \"app\"\n    tags: base.concat([\"derived\"])\n}\n",
        );
        let item = fixture.reader.read_file(&path).unwrap();
        // The derived item takes the prototype's (builtin) type.
        assert_eq!(item.item_type(), ItemType::Product);
        let prototype = item.prototype().expect("prototype is linked");
        let prototype = fixture.reader.pool().get(prototype);
        assert!(prototype.own_property("type").is_some());
        // The override is chained to the prototype's value via `base`.
        let tags = item.own_property("tags").unwrap();
        let source = tags.as_js_source().unwrap();
        assert!(source.base_value().is_some());
    }

    #[test]
    fn prototype_children_are_adopted() {
        let fixture = fixture();
        write(
            &fixture,
            "imports/WithGroup.keel",
            "Product {\n    Group {\n        name: \"fromBase\"\n        files: []\n    }\n}\n",
        );
        let path = write(
            &fixture,
            "p.keel",
            "WithGroup {\n    name: \"app\"\n    Group {\n        name: \"own\"\n        files: []\n    }\n}\n",
        );
        let item = fixture.reader.read_file(&path).unwrap();
        let names: Vec<String> = item
            .children()
            .into_iter()
            .map(|id| fixture.reader.pool().get(id))
            .filter(|child| child.item_type() == ItemType::Group)
            .map(|child| {
                child
                    .own_property("name")
                    .and_then(|v| v.as_js_source().map(|s| s.source_code().to_string()))
                    .unwrap_or_default()
            })
            .collect();
        // Prototype children come first.
        assert_eq!(names, vec!["\"fromBase\"", "\"own\""]);
    }

    #[test]
    fn unknown_item_type_is_fatal_with_location() {
        let fixture = fixture();
        let path = write(&fixture, "p.keel", "NoSuchThing {\n}\n");
        let error = fixture.reader.read_file(&path).unwrap_err();
        assert!(error.to_string().contains("Unknown item type 'NoSuchThing'"));
        assert!(error.location().file_path.ends_with("p.keel"));
    }

    #[test]
    fn cyclic_inheritance_reports_the_cycle() {
        let fixture = fixture();
        write(&fixture, "imports/A.keel", "B {\n}\n");
        write(&fixture, "imports/B.keel", "A {\n}\n");
        let path = write(&fixture, "p.keel", "A {\n}\n");
        let error = fixture.reader.read_file(&path).unwrap_err();
        assert!(error.to_string().contains("Cyclic inheritance detected"));
        assert!(error.to_string().contains("A.keel"));
        assert!(error.to_string().contains("B.keel"));
    }

    #[test]
    fn extra_search_paths_push_and_pop() {
        let fixture = fixture();
        let extra_dir = format!("{}/extra", fixture.root);
        std::fs::create_dir_all(format!("{extra_dir}/imports")).unwrap();
        std::fs::write(
            format!("{extra_dir}/imports/Special.keel"),
            "Product {\n}\n",
        )
        .unwrap();
        let path = write(&fixture, "p.keel", "Special {\n}\n");

        assert!(fixture.reader.read_file(&path).is_err());
        fixture.reader.push_extra_search_paths(vec![extra_dir]);
        assert!(fixture.reader.read_file(&path).is_ok());
        fixture.reader.pop_extra_search_paths();
        assert!(fixture.reader.read_file(&path).is_err());
    }

    #[test]
    fn dotted_assignments_create_nested_items() {
        let fixture = fixture();
        let path = write(
            &fixture,
            "p.keel",
            "Product {\n    name: \"app\"\n    cpp.defines: [\"A\"]\n    a.b.c: 1\n}\n",
        );
        let item = fixture.reader.read_file(&path).unwrap();
        let pool = fixture.reader.pool();
        let cpp = pool.get(item.own_property("cpp").and_then(|v| v.as_item()).unwrap());
        assert_eq!(cpp.item_type(), ItemType::ModuleInstancePlaceholder);
        assert!(cpp.own_property("defines").is_some());
        let a = pool.get(item.own_property("a").and_then(|v| v.as_item()).unwrap());
        assert_eq!(a.item_type(), ItemType::ModulePrefix);
        let b = pool.get(a.own_property("b").and_then(|v| v.as_item()).unwrap());
        assert_eq!(b.item_type(), ItemType::ModuleInstancePlaceholder);
        assert!(b.own_property("c").is_some());
    }

    #[test]
    fn missing_script_import_is_fatal() {
        let fixture = fixture();
        let path = write(
            &fixture,
            "p.keel",
            "import \"nothere.js\" as Util\n\nProduct {\n}\n",
        );
        let error = fixture.reader.read_file(&path).unwrap_err();
        assert!(error.to_string().contains("does not exist"));
    }
}
