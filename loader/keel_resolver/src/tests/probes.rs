//! Probe execution and caching across runs.

use pretty_assertions::assert_eq;

use keel_ir::Variant;

use super::TestProject;

fn probe_project() -> TestProject {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    Probe {
        id: answerProbe
        property int answer
        property bool found
        configure: {
            answer = 6 * 7;
            found = true;
        }
    }
}
"#,
    );
    project
}

#[test]
fn probe_configure_runs_and_records_results() {
    let project = probe_project();
    let result = project.resolve("project.keel").unwrap();
    assert_eq!(result.probe_stats.encountered, 1);
    assert_eq!(result.probe_stats.run, 1);
    let product = &result.project.all_products()[0];
    assert_eq!(product.probes.len(), 1);
    let probe = &product.probes[0];
    assert!(probe.condition);
    assert!(probe.global_id.starts_with("answerProbe_"));
    assert_eq!(probe.properties.get("answer"), Some(&Variant::Int(42)));
    assert_eq!(probe.properties.get("found"), Some(&Variant::Bool(true)));
    assert_eq!(
        probe.initial_properties.get("answer"),
        Some(&Variant::Undefined)
    );
}

#[test]
fn second_setup_reuses_stored_probes() {
    let project = probe_project();
    let first = project.resolve("project.keel").unwrap();
    assert_eq!(first.probe_stats.run, 1);

    let second = project.resolve("project.keel").unwrap();
    assert!(second.probe_stats.encountered > 0);
    assert_eq!(second.probe_stats.run, 0);
    assert_eq!(
        second.probe_stats.cached_old,
        second.probe_stats.encountered
    );
    // The cached results are identical to a fresh run.
    let product = &second.project.all_products()[0];
    assert_eq!(
        product.probes[0].properties.get("answer"),
        Some(&Variant::Int(42))
    );
}

#[test]
fn force_probe_execution_skips_the_stored_cache() {
    let project = probe_project();
    project.resolve("project.keel").unwrap();
    let mut params = project.params("project.keel");
    params.force_probe_execution = true;
    let result = crate::setup_project(&params, None).unwrap();
    assert_eq!(result.probe_stats.run, 1);
    assert_eq!(result.probe_stats.cached_old, 0);
}

#[test]
fn disabled_probe_keeps_initial_values() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    Probe {
        id: offProbe
        condition: false
        property string result: "initial"
        configure: {
            result = "configured";
        }
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    assert_eq!(result.probe_stats.run, 0);
    let probe = &result.project.all_products()[0].probes[0];
    assert!(!probe.condition);
    assert_eq!(probe.properties.get("result"), Some(&Variant::string("initial")));
}

#[test]
fn probe_without_id_is_an_error() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        "Product {\n    name: \"app\"\n    Probe {\n        configure: {\n            var x = 1;\n        }\n    }\n}\n",
    );
    let error = project.resolve("project.keel").unwrap_err();
    assert!(error.to_string().contains("Probe.id must be set"));
}

#[test]
fn probe_results_are_reused_within_one_session() {
    // Two products with the same probe source location run the configure
    // script once; the second product hits the in-session cache.
    let project = TestProject::new();
    project.write(
        "imports/WithProbe.keel",
        r#"Product {
    Probe {
        id: sharedProbe
        property int value
        configure: {
            value = 5;
        }
    }
}
"#,
    );
    project.write(
        "project.keel",
        r#"Project {
    WithProbe { name: "one" }
    WithProbe { name: "two" }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    assert_eq!(result.probe_stats.encountered, 2);
    assert_eq!(result.probe_stats.run, 1);
    assert_eq!(result.probe_stats.cached_current, 1);
}
