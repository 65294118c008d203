//! Item type tags.

use std::fmt;

/// The type of a node in the parsed declarative tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemType {
    Project,
    SubProject,
    Product,
    Group,
    Module,
    ModuleProvider,
    Depends,
    Parameter,
    Properties,
    PropertiesInSubProject,
    Probe,
    Rule,
    Artifact,
    FileTagger,
    JobLimit,
    Scanner,
    Export,
    PropertyOptions,
    /// Synthetic item holding module-instance properties set by a consumer
    /// (`Depends { name: "x"; x.p: v }` or `x.p: v` on a product/group).
    ModuleInstancePlaceholder,
    /// Synthetic item grouping nested assignments under a shared prefix
    /// (`a.b.c: v` creates a prefix item for `a` containing one for `b`).
    ModulePrefix,
}

impl ItemType {
    /// The source-level item name, or `None` for synthetic types that never
    /// appear in files.
    pub fn name(self) -> Option<&'static str> {
        match self {
            ItemType::Project => Some("Project"),
            ItemType::SubProject => Some("SubProject"),
            ItemType::Product => Some("Product"),
            ItemType::Group => Some("Group"),
            ItemType::Module => Some("Module"),
            ItemType::ModuleProvider => Some("ModuleProvider"),
            ItemType::Depends => Some("Depends"),
            ItemType::Parameter => Some("Parameter"),
            ItemType::Properties => Some("Properties"),
            ItemType::PropertiesInSubProject => Some("PropertiesInSubProject"),
            ItemType::Probe => Some("Probe"),
            ItemType::Rule => Some("Rule"),
            ItemType::Artifact => Some("Artifact"),
            ItemType::FileTagger => Some("FileTagger"),
            ItemType::JobLimit => Some("JobLimit"),
            ItemType::Scanner => Some("Scanner"),
            ItemType::Export => Some("Export"),
            ItemType::PropertyOptions => Some("PropertyOptions"),
            ItemType::ModuleInstancePlaceholder | ItemType::ModulePrefix => None,
        }
    }

    /// Maps a source-level item name to its type tag.
    pub fn from_name(name: &str) -> Option<ItemType> {
        Some(match name {
            "Project" => ItemType::Project,
            "SubProject" => ItemType::SubProject,
            "Product" => ItemType::Product,
            "Group" => ItemType::Group,
            "Module" => ItemType::Module,
            "ModuleProvider" => ItemType::ModuleProvider,
            "Depends" => ItemType::Depends,
            "Parameter" => ItemType::Parameter,
            "Properties" => ItemType::Properties,
            "PropertiesInSubProject" => ItemType::PropertiesInSubProject,
            "Probe" => ItemType::Probe,
            "Rule" => ItemType::Rule,
            "Artifact" => ItemType::Artifact,
            "FileTagger" => ItemType::FileTagger,
            "JobLimit" => ItemType::JobLimit,
            "Scanner" => ItemType::Scanner,
            "Export" => ItemType::Export,
            "PropertyOptions" => ItemType::PropertyOptions,
            _ => return None,
        })
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{self:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trip() {
        for ty in [
            ItemType::Project,
            ItemType::Product,
            ItemType::Module,
            ItemType::Export,
            ItemType::PropertyOptions,
        ] {
            let name = ty.name().unwrap();
            assert_eq!(ItemType::from_name(name), Some(ty));
        }
    }

    #[test]
    fn synthetic_types_have_no_source_name() {
        assert_eq!(ItemType::ModulePrefix.name(), None);
        assert_eq!(ItemType::from_name("ModulePrefix"), None);
    }
}
