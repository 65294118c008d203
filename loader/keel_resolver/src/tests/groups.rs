//! Groups: property overrides, wildcards, duplicates, filters.

use pretty_assertions::assert_eq;

use keel_ir::Variant;

use super::TestProject;

#[test]
fn group_overrides_module_list_property() {
    let project = TestProject::new();
    project.write(
        "modules/cpp/cpp.keel",
        "Module {\n    property stringList defines\n    property string warningLevel: \"all\"\n}\n",
    );
    project.write("main.c", "int main() { return 0; }\n");
    project.write("extra.c", "void extra() {}\n");
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    type: ["application"]
    Depends { name: "cpp" }
    cpp.defines: ["A"]
    files: ["main.c"]
    Group {
        name: "special"
        files: ["extra.c"]
        cpp.defines: outer.concat(["B"])
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let product = &result.project.all_products()[0];

    // The product-level value stays untouched.
    assert_eq!(
        product
            .module_properties
            .get("cpp")
            .map(|m| m.map_value("defines")),
        Some(Variant::string_list(["A"]))
    );
    let product_group = product
        .groups
        .iter()
        .find(|g| g.name == "app")
        .expect("product-level group");
    assert_eq!(
        product_group
            .properties
            .get("cpp")
            .map(|m| m.map_value("defines")),
        Some(Variant::string_list(["A"]))
    );

    // The overriding group sees the merged list.
    let special = product
        .groups
        .iter()
        .find(|g| g.name == "special")
        .expect("special group");
    assert_eq!(
        special.properties.get("cpp").map(|m| m.map_value("defines")),
        Some(Variant::string_list(["A", "B"]))
    );
    // Properties that were not overridden are inherited unchanged.
    assert_eq!(
        special
            .properties
            .get("cpp")
            .map(|m| m.map_value("warningLevel")),
        Some(Variant::string("all"))
    );
}

#[test]
fn dependent_properties_are_recomputed_in_groups() {
    let project = TestProject::new();
    project.write(
        "modules/cpp/cpp.keel",
        r#"Module {
    property stringList defines
    property stringList flags: defines.concat(["-O2"])
}
"#,
    );
    project.write("a.c", "\n");
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    Depends { name: "cpp" }
    cpp.defines: ["A"]
    Group {
        name: "g"
        files: ["a.c"]
        cpp.defines: ["B"]
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let product = &result.project.all_products()[0];
    assert_eq!(
        product
            .module_properties
            .get("cpp")
            .map(|m| m.map_value("flags")),
        Some(Variant::string_list(["A", "-O2"]))
    );
    let group = product.groups.iter().find(|g| g.name == "g").unwrap();
    // The flags value depends on defines, so the group's override
    // propagates into it.
    assert_eq!(
        group.properties.get("cpp").map(|m| m.map_value("flags")),
        Some(Variant::string_list(["B", "-O2"]))
    );
}

#[test]
fn wildcards_expand_with_exclusions() {
    let project = TestProject::new();
    project.write("src/a.c", "\n");
    project.write("src/b.c", "\n");
    project.write("src/skip.c", "\n");
    project.write("src/nested/deep.c", "\n");
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    Group {
        name: "sources"
        files: ["src/**/*.c", "src/*.c"]
        excludeFiles: ["skip.c"]
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let product = &result.project.all_products()[0];
    let group = product.groups.iter().find(|g| g.name == "sources").unwrap();
    let wildcards = group.wildcards.as_ref().unwrap();
    let mut names: Vec<&str> = wildcards
        .files
        .iter()
        .map(|f| f.absolute_file_path.rsplit('/').next().unwrap())
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["a.c", "b.c", "deep.c"]);
}

#[test]
fn duplicate_source_files_are_rejected() {
    let project = TestProject::new();
    project.write("main.c", "\n");
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    files: ["main.c"]
    Group {
        name: "again"
        files: ["main.c"]
    }
}
"#,
    );
    let error = project.resolve("project.keel").unwrap_err();
    assert!(error.to_string().contains("Duplicate source file"));
}

#[test]
fn missing_file_is_reported() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        "Product {\n    name: \"app\"\n    files: [\"ghost.c\"]\n}\n",
    );
    let error = project.resolve("project.keel").unwrap_err();
    assert!(error.to_string().contains("does not exist"));
}

#[test]
fn files_and_file_tags_filter_are_exclusive() {
    let project = TestProject::new();
    project.write("main.c", "\n");
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    Group {
        files: ["main.c"]
        fileTagsFilter: ["obj"]
    }
}
"#,
    );
    let error = project.resolve("project.keel").unwrap_err();
    assert!(error
        .to_string()
        .contains("Group.files and Group.fileTagsFilter are exclusive"));
}

#[test]
fn conflicting_file_tags_filter_groups_are_rejected() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    Group {
        name: "one"
        fileTagsFilter: ["obj"]
    }
    Group {
        name: "two"
        fileTagsFilter: ["obj"]
    }
}
"#,
    );
    let error = project.resolve("project.keel").unwrap_err();
    assert!(error
        .to_string()
        .contains("Conflicting fileTagsFilter in Group items"));
}

#[test]
fn disabled_group_keeps_its_files_out_of_the_build() {
    let project = TestProject::new();
    project.write("main.c", "\n");
    project.write("win.c", "\n");
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    files: ["main.c"]
    Group {
        name: "windowsOnly"
        condition: false
        files: ["win.c"]
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let product = &result.project.all_products()[0];
    let enabled: Vec<&str> = product
        .all_enabled_files()
        .iter()
        .map(|f| f.absolute_file_path.rsplit('/').next().unwrap())
        .collect();
    assert_eq!(enabled, vec!["main.c"]);
    let disabled_group = product
        .groups
        .iter()
        .find(|g| g.name == "windowsOnly")
        .unwrap();
    assert!(!disabled_group.enabled);
    assert_eq!(disabled_group.files.len(), 1);
}

#[test]
fn nested_groups_inherit_prefix_and_tags() {
    let project = TestProject::new();
    project.write("gen/one.txt", "\n");
    project.write("gen/two.txt", "\n");
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    Group {
        name: "outerGroup"
        prefix: "gen/"
        fileTags: ["generated"]
        files: ["one.txt"]
        Group {
            name: "innerGroup"
            files: ["two.txt"]
        }
    }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let product = &result.project.all_products()[0];
    let inner = product.groups.iter().find(|g| g.name == "innerGroup").unwrap();
    assert_eq!(inner.prefix, "gen/");
    assert_eq!(inner.files.len(), 1);
    assert!(inner.files[0].absolute_file_path.ends_with("gen/two.txt"));
    assert!(inner.files[0].file_tags.contains(&"generated".into()));
}
