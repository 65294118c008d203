//! Core data model for the keel project loader.
//!
//! This crate provides the item tree that the rest of the loader operates on:
//! - `ItemPool`: arena ownership of all items in a project
//! - `Item`: a node in the parsed declarative tree (type, properties, prototype)
//! - `Value`: the property-value sum type (`JsSource | Variant | Item`)
//! - `Variant`: plain computed data (bool, int, string, list, map)
//! - `PropertyDeclaration`: declared type, flags and allowed values per property
//! - `FileContext`: immutable per-file import and source information
//! - `QualifiedId`, `FileTag`/`FileTags`, `CodeLocation`, `Version`
//!
//! Items reference each other by `ItemId`; the pool outlives every reference.

mod builtins;
mod file_context;
pub mod fileinfo;
mod file_tags;
mod item;
mod item_type;
mod location;
mod pool;
mod property_declaration;
mod qualified_id;
mod value;
mod variant;
mod version;

pub use builtins::BuiltinDeclarations;
pub use file_context::{FileContext, FileContextPtr, JsImport};
pub use file_tags::{FileTag, FileTags};
pub use item::{Item, ItemData, ItemModule};
pub use item_type::ItemType;
pub use location::CodeLocation;
pub use pool::{ItemId, ItemPool};
pub use property_declaration::{
    convert_to_property_type, DeclFlags, PropertyDeclaration, PropertyType,
};
pub use qualified_id::{QualifiedId, QualifiedIdSet};
pub use value::{JsSourceValue, Value, ValuePtr, VariantValue};
pub use variant::Variant;
pub use version::Version;
