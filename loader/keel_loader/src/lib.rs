//! The keel project loader pipeline.
//!
//! Turns a set of description files into a raw, fully-annotated item tree:
//! the [`ItemReader`] parses files and applies prototype inheritance, the
//! [`Evaluator`] computes property values against the scope chain, the
//! [`ModuleLoader`] resolves `Depends` items to module instances (with the
//! [`ModuleProviderLoader`] generating search paths on miss), the
//! [`ProbesResolver`] runs configure scripts with caching, and the
//! [`ProjectTreeBuilder`] drives the whole pipeline. The resolver crate
//! walks the resulting tree into the resolved model.

mod evaluator;
mod item_reader;
mod module_loader;
mod module_provider;
mod params;
mod probes;
mod profiles;
mod progress;
mod script_importer;
pub mod tracing_setup;
mod tree_builder;

pub use evaluator::{EvalCacheEnabler, Evaluator, SharedEngine};
pub use item_reader::ItemReader;
pub use module_loader::{ModuleLoader, ProductContext};
pub use module_provider::{
    ModuleProviderInfo, ModuleProviderLoader, ModuleProviderLookup, ModuleProviderResult,
    ProviderCacheKey, StoredModuleProviderInfo,
};
pub use params::{
    ErrorHandlingMode, RestoreBehavior, SetupParameters, BASE_MODULE_NAME, SHADOW_PRODUCT_PREFIX,
};
pub use probes::{ProbeRecord, ProbeStats, ProbesResolver};
pub use profiles::Profiles;
pub use progress::{check_cancelation, ProgressObserver};
pub use tree_builder::{LoadResult, ProductInfo, ProjectTreeBuilder};
