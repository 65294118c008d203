//! Plain products: properties, groups, taggers, persistence.

use pretty_assertions::assert_eq;

use keel_ir::Variant;

use super::TestProject;
use crate::persistence;

#[test]
fn resolves_simple_product() {
    let project = TestProject::new();
    project.write("main.c", "int main() { return 0; }\n");
    project.write("README", "docs\n");
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    type: ["application"]
    files: ["main.c", "README"]
    FileTagger {
        patterns: ["*.c"]
        fileTags: ["c"]
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let products = result.project.all_products();
    assert_eq!(products.len(), 1);
    let product = products[0];
    assert!(product.enabled);
    assert_eq!(product.name, "app");
    // targetName defaults to the product name.
    assert_eq!(product.target_name, "app");
    assert_eq!(product.file_tags.to_string_list(), vec!["application"]);

    let artifacts = product.all_enabled_files();
    assert_eq!(artifacts.len(), 2);
    let main_c = artifacts
        .iter()
        .find(|a| a.absolute_file_path.ends_with("main.c"))
        .unwrap();
    assert!(main_c.file_tags.contains(&"c".into()));
    let readme = artifacts
        .iter()
        .find(|a| a.absolute_file_path.ends_with("README"))
        .unwrap();
    assert!(readme.file_tags.contains(&"unknown-file-tag".into()));
}

#[test]
fn product_condition_false_disables_product() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        "Product {\n    name: \"off\"\n    condition: false\n}\n",
    );
    let result = project.resolve("project.keel").unwrap();
    let products = result.project.all_products();
    assert_eq!(products.len(), 1);
    assert!(!products[0].enabled);
}

#[test]
fn product_properties_are_evaluated() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    type: ["application"]
    property string flavor: "vanilla"
    property stringList extras: [flavor, "sprinkles"]
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let product = &result.project.all_products()[0];
    assert_eq!(
        product.product_properties.get("flavor"),
        Some(&Variant::string("vanilla"))
    );
    assert_eq!(
        product.product_properties.get("extras"),
        Some(&Variant::string_list(["vanilla", "sprinkles"]))
    );
}

#[test]
fn build_graph_is_persisted_and_restorable() {
    let project = TestProject::new();
    project.write("project.keel", "Product {\n    name: \"app\"\n}\n");
    let result = project.resolve("project.keel").unwrap();
    let graph_file =
        persistence::build_graph_file_path(&format!("{}/build/default", project.root()));
    let restored = persistence::restore(&graph_file).unwrap();
    assert_eq!(restored, result.project);
}

#[test]
fn dry_run_does_not_persist() {
    let project = TestProject::new();
    project.write("project.keel", "Product {\n    name: \"app\"\n}\n");
    let mut params = project.params("project.keel");
    params.dry_run = true;
    crate::setup_project(&params, None).unwrap();
    let graph_file =
        persistence::build_graph_file_path(&format!("{}/build/default", project.root()));
    assert!(!std::path::Path::new(&graph_file).exists());
}

#[test]
fn project_tree_with_references_and_subprojects() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Project {
    name: "top"
    references: ["lib/lib.keel"]
    SubProject {
        filePath: "sub/sub.keel"
    }
}
"#,
    );
    project.write("lib/lib.keel", "Product {\n    name: \"lib\"\n}\n");
    project.write(
        "sub/sub.keel",
        "Project {\n    name: \"inner\"\n    Product {\n        name: \"tool\"\n    }\n}\n",
    );
    let result = project.resolve("project.keel").unwrap();
    let names: Vec<String> = result
        .project
        .all_products()
        .iter()
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"lib".to_string()));
    assert!(names.contains(&"tool".to_string()));
    assert_eq!(result.project.project.sub_projects.len(), 1);
    assert_eq!(result.project.project.sub_projects[0].name, "inner");
}

#[test]
fn rules_resolve_with_artifacts_and_scripts() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    type: ["application"]
    Rule {
        inputs: ["c"]
        Artifact {
            filePath: input.fileName + ".o"
            fileTags: ["obj"]
        }
        prepare: {
            var commands = [];
            return commands;
        }
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let product = &result.project.all_products()[0];
    assert_eq!(product.rules.len(), 1);
    let rule = &product.rules[0];
    assert!(rule.declares_inputs());
    assert!(rule.requires_inputs);
    assert_eq!(rule.artifacts.len(), 1);
    // The artifact path stays raw source, evaluated per invocation later.
    assert_eq!(rule.artifacts[0].file_path, "input.fileName + \".o\"");
    assert_eq!(rule.artifacts[0].file_tags.to_string_list(), vec!["obj"]);
    assert!(rule.prepare_script.is_valid());
    assert!(rule
        .prepare_script
        .source_code
        .starts_with("(function(project,product,inputs,outputs,input,output,explicitlyDependsOn)"));
    assert!(rule.prepare_script.source_code.contains("var commands"));
}

#[test]
fn job_limits_innermost_wins() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Project {
    name: "top"
    JobLimit {
        jobPool: "linker"
        jobCount: 4
    }
    Product {
        name: "app"
        JobLimit {
            jobPool: "linker"
            jobCount: 1
        }
        JobLimit {
            jobPool: "compiler"
            jobCount: 8
        }
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let product = &result.project.all_products()[0];
    assert_eq!(product.job_limits.get_limit("linker"), Some(1));
    assert_eq!(product.job_limits.get_limit("compiler"), Some(8));
}
