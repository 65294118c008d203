//! The `setup` entry point: wires the pipeline together and handles
//! restore behavior against the stored build graph.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info};

use keel_diagnostic::{ErrorKind, Result};
use keel_ir::ItemPool;
use keel_js::ScriptEngine;
use keel_loader::{
    Evaluator, ItemReader, ProbeStats, ProgressObserver, RestoreBehavior, SetupParameters,
    SharedEngine,
};

use crate::model::TopLevelProject;
use crate::persistence;
use crate::resolver::ProjectResolver;

/// The outcome of a setup request.
#[derive(Debug)]
pub struct ResolveResult {
    pub project: TopLevelProject,
    pub probe_stats: ProbeStats,
}

/// Sets up a project: restores the stored build graph and/or resolves the
/// project per the requested restore behavior, then persists the result.
pub fn setup_project(
    params: &SetupParameters,
    progress: Option<&dyn ProgressObserver>,
) -> Result<ResolveResult> {
    let build_directory = format!("{}/{}", params.build_root, params.configuration_name);
    let graph_file = persistence::build_graph_file_path(&build_directory);

    let restored = match params.restore_behavior {
        RestoreBehavior::RestoreOnly => {
            let project = persistence::restore(&graph_file)?;
            return Ok(ResolveResult {
                project,
                probe_stats: ProbeStats::default(),
            });
        }
        RestoreBehavior::ResolveOnly => None,
        RestoreBehavior::RestoreAndTrackChanges => match persistence::restore(&graph_file) {
            Ok(project) => Some(project),
            Err(error) if error.kind == ErrorKind::NotFound => None,
            Err(error) => {
                // Incompatible stored data: fall back to a full resolve.
                debug!("cannot restore build graph: {error}");
                None
            }
        },
    };

    let pool = Rc::new(ItemPool::new());
    let engine: SharedEngine = Rc::new(RefCell::new(ScriptEngine::new()));
    engine.borrow_mut().set_environment(params.environment.clone());
    let reader = ItemReader::new(Rc::clone(&pool));
    reader.set_search_paths(params.search_paths.clone());
    let evaluator = Evaluator::new(pool, engine);

    let mut resolver = ProjectResolver::new(params, &reader, &evaluator);
    resolver.set_progress_observer(progress);
    if let Some(old) = &restored {
        resolver.set_old_project_probes(old.probes.clone());
        resolver.set_old_product_probes(old.product_probes());
        resolver.set_last_resolve_time(old.last_resolve_time);
        if !params.override_build_graph_data {
            resolver.set_stored_module_provider_info(old.module_provider_info.clone());
        }
    }

    let result = resolver.resolve()?;
    if params.log_elapsed_time {
        info!(
            products = result.project.all_products().len(),
            "project resolved"
        );
    }
    if !params.dry_run {
        persistence::store(&result.project, &graph_file)?;
    }
    Ok(result)
}
