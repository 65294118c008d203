//! Error propagation: strict vs relaxed, duplicates, cancellation.

use std::cell::Cell;

use pretty_assertions::assert_eq;

use keel_diagnostic::ErrorKind;
use keel_loader::{ErrorHandlingMode, ProgressObserver};

use super::TestProject;
use crate::persistence;

#[test]
fn duplicate_product_names_fail_strictly() {
    let project = TestProject::new();
    project.write(
        "one/one.keel",
        "Product {\n    name: \"app\"\n}\n",
    );
    project.write(
        "two/two.keel",
        "Product {\n    name: \"app\"\n}\n",
    );
    project.write(
        "project.keel",
        "Project {\n    references: [\"one/one.keel\", \"two/two.keel\"]\n}\n",
    );
    let error = project.resolve("project.keel").unwrap_err();
    let message = error.to_string();
    assert!(message.contains("Duplicate product name 'app'"));
    assert!(message.contains("one/one.keel"));
    assert!(message.contains("two/two.keel"));
}

#[test]
fn relaxed_mode_disables_broken_products() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Project {
    Product {
        name: "broken"
        Depends { name: "nosuch" }
    }
    Product {
        name: "healthy"
    }
}
"#,
    );
    let mut params = project.params("project.keel");
    params.product_error_mode = ErrorHandlingMode::Relaxed;
    let result = crate::setup_project(&params, None).unwrap();
    let products = result.project.all_products();
    assert_eq!(products.len(), 2);
    let broken = products.iter().find(|p| p.name == "broken").unwrap();
    assert!(!broken.enabled);
    let healthy = products.iter().find(|p| p.name == "healthy").unwrap();
    assert!(healthy.enabled);
}

#[test]
fn strict_mode_aggregates_errors_across_products() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Project {
    Product {
        name: "first"
        Depends { name: "missing1" }
    }
    Product {
        name: "second"
        Depends { name: "missing2" }
    }
}
"#,
    );
    let error = project.resolve("project.keel").unwrap_err();
    let message = error.to_string();
    // A single invocation reports as many problems as possible.
    assert!(message.contains("'missing1' not found"));
    assert!(message.contains("'missing2' not found"));
}

#[test]
fn rule_without_inputs_must_be_multiplex() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    Rule {
        outputFileTags: ["generated"]
        prepare: {
            return [];
        }
    }
}
"#,
    );
    let error = project.resolve("project.keel").unwrap_err();
    assert!(error
        .to_string()
        .contains("Rule has no inputs, but is not a multiplex rule"));
}

#[test]
fn rule_needs_artifacts_or_output_tags() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    Rule {
        inputs: ["c"]
        prepare: {
            return [];
        }
    }
}
"#,
    );
    let error = project.resolve("project.keel").unwrap_err();
    assert!(error
        .to_string()
        .contains("Artifact items or a non-empty outputFileTags"));
}

#[test]
fn file_tagger_requires_patterns_and_tags() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        "Product {\n    name: \"app\"\n    FileTagger {\n        fileTags: [\"c\"]\n    }\n}\n",
    );
    let error = project.resolve("project.keel").unwrap_err();
    assert!(error
        .to_string()
        .contains("FileTagger.patterns must be a non-empty list"));
}

#[test]
fn evaluation_errors_carry_the_script_location() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        "Product {\n    name: \"app\"\n    property string bad: completelyUnknownName\n}\n",
    );
    let error = project.resolve("project.keel").unwrap_err();
    assert_eq!(error.kind, ErrorKind::Evaluation);
    assert!(error.to_string().contains("project.keel"));
    assert!(error.to_string().contains("completelyUnknownName"));
}

struct CancellingObserver {
    polls: Cell<usize>,
}

impl ProgressObserver for CancellingObserver {
    fn initialize(&self, _task: &str, _maximum: usize) {}
    fn set_progress_value(&self, _value: usize) {}
    fn increment_progress_value(&self) {}
    fn canceled(&self) -> bool {
        self.polls.set(self.polls.get() + 1);
        true
    }
}

#[test]
fn cancellation_unwinds_without_persisting() {
    let project = TestProject::new();
    project.write("project.keel", "Product {\n    name: \"app\"\n}\n");
    let observer = CancellingObserver {
        polls: Cell::new(0),
    };
    let params = project.params("project.keel");
    let error = crate::setup_project(&params, Some(&observer)).unwrap_err();
    assert!(error.is_cancellation());
    assert!(error.to_string().contains("canceled"));
    assert!(observer.polls.get() > 0);
    let graph_file =
        persistence::build_graph_file_path(&format!("{}/build/default", project.root()));
    assert!(!std::path::Path::new(&graph_file).exists());
}

#[test]
fn parse_errors_are_local_to_one_file() {
    let project = TestProject::new();
    project.write("broken/broken.keel", "Product {\n    name =\n}\n");
    project.write("ok/ok.keel", "Product {\n    name: \"fine\"\n}\n");
    project.write(
        "project.keel",
        "Project {\n    references: [\"broken/broken.keel\", \"ok/ok.keel\"]\n}\n",
    );
    let error = project.resolve("project.keel").unwrap_err();
    // The broken file is reported...
    assert!(error.to_string().contains("broken.keel"));
    // ...and parsing it again directly still works for the good file.
    let other = TestProject::new();
    other.write("project.keel", "Product {\n    name: \"fine\"\n}\n");
    assert!(other.resolve("project.keel").is_ok());
}
