//! Built-in property declarations per item type.
//!
//! Every property the evaluator reads on a concrete item must be declared;
//! these tables supply the declarations for the built-in item types. User
//! files add their own with `property <type> <name>` syntax.

use rustc_hash::FxHashMap;

use crate::{DeclFlags, ItemType, PropertyDeclaration, PropertyType, Variant};

/// Lookup table of built-in declarations.
pub struct BuiltinDeclarations {
    decls: FxHashMap<ItemType, Vec<PropertyDeclaration>>,
}

fn decl(name: &str, typ: PropertyType) -> PropertyDeclaration {
    PropertyDeclaration::new(name, typ)
}

fn condition_default_true() -> PropertyDeclaration {
    decl("condition", PropertyType::Boolean).with_default(Variant::Bool(true))
}

fn script(name: &str, args: &[&str]) -> PropertyDeclaration {
    PropertyDeclaration {
        name: name.to_string(),
        typ: PropertyType::Variant,
        flags: DeclFlags {
            not_available_in_config: true,
        },
        function_argument_names: args.iter().map(|s| (*s).to_string()).collect(),
        ..PropertyDeclaration::default()
    }
}

impl BuiltinDeclarations {
    pub fn new() -> Self {
        let mut decls = FxHashMap::default();

        decls.insert(
            ItemType::Project,
            vec![
                decl("name", PropertyType::String),
                condition_default_true(),
                decl("buildDirectory", PropertyType::Path).not_in_config(),
                decl("profile", PropertyType::String),
                decl("references", PropertyType::PathList),
                decl("keelSearchPaths", PropertyType::StringList),
                decl("keelModuleProviders", PropertyType::StringList),
                decl("minimumKeelVersion", PropertyType::String),
                decl("sourceDirectory", PropertyType::Path).not_in_config(),
            ],
        );

        decls.insert(
            ItemType::SubProject,
            vec![
                decl("filePath", PropertyType::Path),
                decl("inheritProperties", PropertyType::Boolean).with_default(Variant::Bool(true)),
            ],
        );

        decls.insert(
            ItemType::Product,
            vec![
                decl("name", PropertyType::String).with_default(Variant::string("")),
                decl("type", PropertyType::StringList),
                condition_default_true(),
                decl("targetName", PropertyType::String).with_source_default("name"),
                decl("destinationDirectory", PropertyType::String),
                decl("files", PropertyType::StringList),
                decl("excludeFiles", PropertyType::StringList),
                decl("buildDirectory", PropertyType::Path).not_in_config(),
                decl("sourceDirectory", PropertyType::Path).not_in_config(),
                decl("multiplexConfigurationId", PropertyType::String).not_in_config(),
                decl("profiles", PropertyType::StringList),
                decl("version", PropertyType::String),
                decl("keelModuleProviders", PropertyType::StringList),
            ],
        );

        decls.insert(
            ItemType::Group,
            vec![
                decl("name", PropertyType::String),
                condition_default_true(),
                decl("files", PropertyType::StringList),
                decl("fileTagsFilter", PropertyType::StringList),
                decl("fileTags", PropertyType::StringList),
                decl("prefix", PropertyType::String),
                decl("overrideTags", PropertyType::Boolean).with_default(Variant::Bool(true)),
                decl("excludeFiles", PropertyType::StringList),
                decl("targetOfModule", PropertyType::String).not_in_config(),
            ],
        );

        decls.insert(
            ItemType::Module,
            vec![
                decl("name", PropertyType::String).not_in_config(),
                condition_default_true(),
                decl("present", PropertyType::Boolean).with_default(Variant::Bool(true)),
                decl("version", PropertyType::String),
                script("setupBuildEnvironment", &["project", "product"]),
                script("setupRunEnvironment", &["project", "product"]),
            ],
        );

        decls.insert(
            ItemType::ModuleProvider,
            vec![
                decl("name", PropertyType::String),
                condition_default_true(),
                decl("relativeSearchPaths", PropertyType::StringList)
                    .with_default(Variant::List(Vec::new())),
                decl("outputBaseDir", PropertyType::Path),
            ],
        );

        decls.insert(
            ItemType::Depends,
            vec![
                decl("name", PropertyType::String),
                condition_default_true(),
                decl("submodules", PropertyType::StringList),
                decl("required", PropertyType::Boolean).with_default(Variant::Bool(true)),
                decl("versionAtLeast", PropertyType::String),
                decl("versionBelow", PropertyType::String),
                decl("productTypes", PropertyType::StringList),
                decl("limitToSubProject", PropertyType::Boolean).with_default(Variant::Bool(false)),
                decl("profiles", PropertyType::StringList),
                decl("enableFallback", PropertyType::Boolean).with_default(Variant::Bool(true)),
            ],
        );

        decls.insert(ItemType::Parameter, Vec::new());

        decls.insert(
            ItemType::Properties,
            vec![decl("condition", PropertyType::Boolean)],
        );

        decls.insert(
            ItemType::PropertiesInSubProject,
            vec![
                decl("name", PropertyType::String),
                decl("condition", PropertyType::Boolean),
            ],
        );

        decls.insert(
            ItemType::Probe,
            vec![
                condition_default_true(),
                decl("found", PropertyType::Boolean),
                script("configure", &[]),
            ],
        );

        decls.insert(
            ItemType::Rule,
            vec![
                decl("name", PropertyType::String),
                condition_default_true(),
                decl("inputs", PropertyType::StringList),
                decl("inputsFromDependencies", PropertyType::StringList),
                decl("auxiliaryInputs", PropertyType::StringList),
                decl("excludedInputs", PropertyType::StringList),
                decl("excludedAuxiliaryInputs", PropertyType::StringList),
                decl("explicitlyDependsOn", PropertyType::StringList),
                decl("explicitlyDependsOnFromDependencies", PropertyType::StringList),
                decl("outputFileTags", PropertyType::StringList),
                decl("multiplex", PropertyType::Boolean).with_default(Variant::Bool(false)),
                decl("requiresInputs", PropertyType::Boolean),
                decl("alwaysRun", PropertyType::Boolean).with_default(Variant::Bool(false)),
                script(
                    "prepare",
                    &[
                        "project",
                        "product",
                        "inputs",
                        "outputs",
                        "input",
                        "output",
                        "explicitlyDependsOn",
                    ],
                ),
                script("outputArtifacts", &["project", "product", "inputs", "input"]),
            ],
        );

        decls.insert(
            ItemType::Artifact,
            vec![
                decl("filePath", PropertyType::String).not_in_config(),
                decl("fileTags", PropertyType::StringList),
                decl("alwaysUpdated", PropertyType::Boolean).with_default(Variant::Bool(true)),
            ],
        );

        decls.insert(
            ItemType::FileTagger,
            vec![
                decl("patterns", PropertyType::StringList),
                decl("fileTags", PropertyType::StringList),
                decl("priority", PropertyType::Integer).with_default(Variant::Int(0)),
                condition_default_true(),
            ],
        );

        decls.insert(
            ItemType::JobLimit,
            vec![
                decl("jobPool", PropertyType::String),
                decl("jobCount", PropertyType::Integer),
                condition_default_true(),
            ],
        );

        decls.insert(
            ItemType::Scanner,
            vec![
                condition_default_true(),
                decl("inputs", PropertyType::StringList),
                decl("recursive", PropertyType::Boolean).with_default(Variant::Bool(false)),
                script("searchPaths", &["project", "product", "input"]),
                script("scan", &["project", "product", "input", "filePath"]),
            ],
        );

        decls.insert(
            ItemType::Export,
            vec![
                condition_default_true(),
                decl("prefixMapping", PropertyType::Variant),
            ],
        );

        decls.insert(
            ItemType::PropertyOptions,
            vec![
                decl("name", PropertyType::String),
                decl("description", PropertyType::String),
                decl("removalVersion", PropertyType::String),
                decl("allowedValues", PropertyType::StringList),
            ],
        );

        BuiltinDeclarations { decls }
    }

    /// Declarations for a built-in item type (empty for synthetic types).
    pub fn declarations_for(&self, typ: ItemType) -> &[PropertyDeclaration] {
        self.decls.get(&typ).map_or(&[], Vec::as_slice)
    }
}

impl Default for BuiltinDeclarations {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_source_type_has_declarations() {
        let builtins = BuiltinDeclarations::new();
        for typ in [
            ItemType::Project,
            ItemType::Product,
            ItemType::Group,
            ItemType::Module,
            ItemType::Depends,
            ItemType::Rule,
            ItemType::FileTagger,
            ItemType::Probe,
        ] {
            assert!(
                !builtins.declarations_for(typ).is_empty(),
                "missing declarations for {typ}"
            );
        }
    }

    #[test]
    fn rule_prepare_is_a_script() {
        let builtins = BuiltinDeclarations::new();
        let prepare = builtins
            .declarations_for(ItemType::Rule)
            .iter()
            .find(|d| d.name == "prepare")
            .unwrap();
        assert!(prepare.flags.not_available_in_config);
        assert!(prepare.function_argument_names.contains(&"inputs".to_string()));
    }

    #[test]
    fn synthetic_types_have_none() {
        let builtins = BuiltinDeclarations::new();
        assert!(builtins.declarations_for(ItemType::ModulePrefix).is_empty());
    }
}
