//! Export items: published module surfaces and product dependencies.

use pretty_assertions::assert_eq;

use keel_ir::Variant;

use super::TestProject;

#[test]
fn export_surface_is_visible_to_consumers() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Project {
    Product {
        name: "thelib"
        type: ["library"]
        Export {
            property string includeDir: "include"
        }
    }
    Product {
        name: "app"
        Depends { name: "thelib" }
        property string libInclude: thelib.includeDir
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let products = result.project.all_products();
    let app = products.iter().find(|p| p.name == "app").unwrap();

    // The dependency edge is recorded, sorted by display name.
    assert_eq!(app.dependencies, vec!["thelib"]);
    // The exported surface appears as a module of the consumer.
    assert!(app.modules.iter().any(|m| m.name == "thelib" && m.is_product_dependency));
    assert_eq!(
        app.module_properties
            .get("thelib")
            .map(|m| m.map_value("includeDir")),
        Some(Variant::string("include"))
    );
    // Consumer expressions can read the exported properties.
    assert_eq!(
        app.product_properties.get("libInclude"),
        Some(&Variant::string("include"))
    );

    let lib = products.iter().find(|p| p.name == "thelib").unwrap();
    let exported: Vec<&str> = lib
        .exported_module
        .properties
        .iter()
        .map(|p| p.full_name.as_str())
        .collect();
    assert_eq!(exported, vec!["includeDir"]);
    assert_eq!(
        lib.exported_module.property_values.get("includeDir"),
        Some(&Variant::string("include"))
    );
}

#[test]
fn export_can_pull_in_modules_for_consumers() {
    let project = TestProject::new();
    project.write(
        "modules/cpp/cpp.keel",
        "Module {\n    property stringList defines\n}\n",
    );
    project.write(
        "project.keel",
        r#"Project {
    Product {
        name: "thelib"
        Export {
            Depends { name: "cpp" }
            cpp.defines: ["FROM_LIB"]
        }
    }
    Product {
        name: "app"
        Depends { name: "thelib" }
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let products = result.project.all_products();
    let app = products.iter().find(|p| p.name == "app").unwrap();
    // The module dependency of the export surface reaches the consumer,
    // with the exported override applied.
    assert!(app.modules.iter().any(|m| m.name == "cpp"));
    assert_eq!(
        app.module_properties
            .get("cpp")
            .map(|m| m.map_value("defines")),
        Some(Variant::string_list(["FROM_LIB"]))
    );

    let lib = products.iter().find(|p| p.name == "thelib").unwrap();
    assert!(lib
        .exported_module
        .module_dependencies
        .iter()
        .any(|d| d.name == "cpp"));
    assert_eq!(
        lib.exported_module.module_property_values.get("cpp.defines"),
        Some(&Variant::string_list(["FROM_LIB"]))
    );
}

#[test]
fn product_dependencies_without_export_still_form_edges() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Project {
    Product {
        name: "zeta"
    }
    Product {
        name: "alpha"
    }
    Product {
        name: "app"
        Depends { name: "zeta" }
        Depends { name: "alpha" }
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let app = result
        .project
        .all_products()
        .into_iter()
        .find(|p| p.name == "app")
        .cloned()
        .unwrap();
    // Sorted by display name for reproducibility.
    assert_eq!(app.dependencies, vec!["alpha", "zeta"]);
}

#[test]
fn export_import_statements_are_captured() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"import keel.FileInfo

Project {
    Product {
        name: "thelib"
        Export {
            property string headerDir: FileInfo.joinPaths("inc", "public")
        }
    }
    Product {
        name: "app"
        Depends { name: "thelib" }
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let lib = result
        .project
        .all_products()
        .into_iter()
        .find(|p| p.name == "thelib")
        .cloned()
        .unwrap();
    assert_eq!(
        lib.exported_module.import_statements,
        vec!["import keel.FileInfo"]
    );
    assert_eq!(
        lib.exported_module.property_values.get("headerDir"),
        Some(&Variant::string("inc/public"))
    );
}
