//! End-to-end scenarios: whole projects laid out on disk, loaded through
//! the full pipeline.

mod basic;
mod errors;
mod exports;
mod groups;
mod probes;
mod providers;

use std::collections::BTreeMap;

use keel_loader::SetupParameters;

use crate::setup::{setup_project, ResolveResult};

/// A project tree in a temporary directory. The root directory doubles as
/// a search path, so `modules/`, `imports/` and `module-providers/`
/// subdirectories work as in an installed tool.
pub(crate) struct TestProject {
    dir: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        TestProject {
            dir: tempfile::tempdir().expect("cannot create temp dir"),
        }
    }

    pub fn root(&self) -> String {
        self.dir.path().to_string_lossy().replace('\\', "/")
    }

    pub fn file(&self, relative: &str) -> String {
        format!("{}/{relative}", self.root())
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("cannot create dirs");
        }
        std::fs::write(path, content).expect("cannot write file");
    }

    pub fn params(&self, project_file: &str) -> SetupParameters {
        let mut params = SetupParameters::new(
            self.file(project_file),
            format!("{}/build", self.root()),
        );
        params.search_paths = vec![self.root()];
        params.environment = BTreeMap::new();
        params
    }

    pub fn resolve(&self, project_file: &str) -> keel_diagnostic::Result<ResolveResult> {
        setup_project(&self.params(project_file), None)
    }
}
