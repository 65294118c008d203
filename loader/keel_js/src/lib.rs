//! Script engine for the keel loader.
//!
//! The loader consumes a narrow capability set: evaluate source against an
//! explicit scope chain, construct objects, extract plain data, detect
//! functions, consume exceptions, and record file-system observations.
//! This crate provides that surface ([`ScriptEngine`]) backed by an
//! embedded interpreter over a script subset; the loader never depends on
//! anything beyond the public surface, so a different runtime could be
//! swapped in behind it.

mod analysis;
mod ast;
mod engine;
mod error;
mod extensions;
mod interp;
mod methods;
mod parser;
mod value;

pub use analysis::free_paths;
pub use engine::{FsObservations, ScriptEngine};
pub use error::JsError;
pub use extensions::{extension_names, extension_object};
pub use value::{JsObject, JsValue};
