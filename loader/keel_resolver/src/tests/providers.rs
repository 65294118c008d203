//! Module providers: search-path synthesis on module miss.

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;

use keel_ir::Variant;

use super::TestProject;

fn empty_config_hash() -> String {
    Variant::Map(BTreeMap::new()).config_hash()
}

#[test]
fn provider_fallback_materializes_search_paths() {
    let project = TestProject::new();
    // No modules/Foo anywhere, but a scoped provider exists.
    project.write(
        "module-providers/Foo/provider.keel",
        "ModuleProvider {\n    relativeSearchPaths: [\"generated\"]\n}\n",
    );
    // The provider's output directory is derived from the project build
    // directory, the provider name and the config hash; the module file
    // is pre-generated there.
    let generated_root = format!(
        "build/default/genmodules/Foo/{}/generated",
        empty_config_hash()
    );
    project.write(
        &format!("{generated_root}/modules/Foo/foo.keel"),
        "Module {\n    property string origin: \"provided\"\n}\n",
    );
    project.write(
        "project.keel",
        "Product {\n    name: \"app\"\n    Depends { name: \"Foo\" }\n}\n",
    );
    let result = project.resolve("project.keel").unwrap();
    let product = &result.project.all_products()[0];
    assert!(product.modules.iter().any(|m| m.name == "Foo"));
    assert_eq!(
        product
            .module_properties
            .get("Foo")
            .map(|m| m.map_value("origin")),
        Some(Variant::string("provided"))
    );
    // The provider run is cached in the stored info.
    assert!(result
        .project
        .module_provider_info
        .providers
        .keys()
        .any(|key| key.name == "Foo"));
}

#[test]
fn provider_config_reaches_the_cache_key() {
    let project = TestProject::new();
    project.write(
        "module-providers/Bar/provider.keel",
        "ModuleProvider {\n    property string flavor\n    relativeSearchPaths: []\n}\n",
    );
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    moduleProviders.Bar.flavor: "spicy"
    Depends { name: "Bar"; required: false }
}
"#,
    );
    let result = project.resolve("project.keel").unwrap();
    let info = result
        .project
        .module_provider_info
        .providers
        .iter()
        .find(|(key, _)| key.name == "Bar")
        .map(|(_, info)| info.clone())
        .expect("provider ran");
    assert_eq!(info.config.map_value("flavor"), Variant::string("spicy"));
    // No search paths were produced, so the module stays absent.
    let product = &result.project.all_products()[0];
    assert!(!product.modules.iter().any(|m| m.name == "Bar"));
}

#[test]
fn unknown_named_provider_is_fatal() {
    let project = TestProject::new();
    project.write(
        "project.keel",
        r#"Product {
    name: "app"
    keelModuleProviders: ["nosuchprovider"]
    Depends { name: "ghost" }
}
"#,
    );
    let error = project.resolve("project.keel").unwrap_err();
    assert!(error.to_string().contains("Unknown provider 'nosuchprovider'"));
}

#[test]
fn scoped_provider_miss_falls_through_silently() {
    let project = TestProject::new();
    // No provider at all; the scoped scan and the fallback shape both
    // miss, which is not an error by itself -- the dependency is simply
    // not found.
    project.write(
        "project.keel",
        "Product {\n    name: \"app\"\n    Depends { name: \"ghost\"; required: false }\n}\n",
    );
    let result = project.resolve("project.keel").unwrap();
    let product = &result.project.all_products()[0];
    assert!(product.enabled);
    assert!(!product.modules.iter().any(|m| m.name == "ghost"));
}
