//! Parser tests.

use pretty_assertions::assert_eq;

use crate::{parse_file, AstImport, AstMember};

#[test]
fn parses_imports_and_root_item() {
    let source = "import keel.FileInfo\nimport \"util.js\" as Util\n\nProject {\n}\n";
    let file = parse_file(source, "/p.keel").unwrap();
    assert_eq!(file.imports.len(), 2);
    assert_eq!(
        file.imports[0],
        AstImport::Extension {
            name: "FileInfo".to_string(),
            location: keel_ir::CodeLocation::new("/p.keel", 1, 1),
        }
    );
    match &file.imports[1] {
        AstImport::File { path, alias, .. } => {
            assert_eq!(path, "util.js");
            assert_eq!(alias, "Util");
        }
        other => panic!("unexpected import {other:?}"),
    }
    assert_eq!(file.root.type_name, "Project");
}

#[test]
fn parses_assignments_and_children() {
    let source = "Product {\n    name: \"app\"\n    Group {\n        files: [\"a.c\", \"b.c\"]\n    }\n}\n";
    let file = parse_file(source, "/p.keel").unwrap();
    let members = &file.root.members;
    assert_eq!(members.len(), 2);
    match &members[0] {
        AstMember::Assignment(a) => {
            assert_eq!(a.name_parts, vec!["name"]);
            assert_eq!(a.source, "\"app\"");
            assert!(!a.has_function_form);
        }
        other => panic!("unexpected member {other:?}"),
    }
    match &members[1] {
        AstMember::Child(item) => {
            assert_eq!(item.type_name, "Group");
            assert_eq!(item.members.len(), 1);
        }
        other => panic!("unexpected member {other:?}"),
    }
}

#[test]
fn parses_dotted_assignment() {
    let source = "Group {\n    cpp.defines: outer.concat([\"B\"])\n}\n";
    let file = parse_file(source, "/p.keel").unwrap();
    match &file.root.members[0] {
        AstMember::Assignment(a) => {
            assert_eq!(a.name_parts, vec!["cpp", "defines"]);
            assert_eq!(a.source, "outer.concat([\"B\"])");
        }
        other => panic!("unexpected member {other:?}"),
    }
}

#[test]
fn parses_property_declarations() {
    let source =
        "Probe {\n    property string answer\n    property var config: ({})\n    property bool ok: true\n}\n";
    let file = parse_file(source, "/p.keel").unwrap();
    let decls: Vec<_> = file
        .root
        .members
        .iter()
        .filter_map(|m| match m {
            AstMember::Declaration(d) => Some(d),
            _ => None,
        })
        .collect();
    assert_eq!(decls.len(), 3);
    assert_eq!(decls[0].name, "answer");
    assert_eq!(decls[0].type_name, "string");
    assert_eq!(decls[0].source, None);
    assert_eq!(decls[1].type_name, "var");
    assert_eq!(decls[1].source.as_deref(), Some("({})"));
    assert_eq!(decls[2].source.as_deref(), Some("true"));
}

#[test]
fn parses_id_member() {
    let source = "Probe {\n    id: compilerProbe\n}\n";
    let file = parse_file(source, "/p.keel").unwrap();
    match &file.root.members[0] {
        AstMember::Id { name, .. } => assert_eq!(name, "compilerProbe"),
        other => panic!("unexpected member {other:?}"),
    }
}

#[test]
fn multi_line_expressions_inside_brackets() {
    let source = "Product {\n    files: [\n        \"a.c\",\n        \"b.c\",\n    ]\n    name: \"x\"\n}\n";
    let file = parse_file(source, "/p.keel").unwrap();
    assert_eq!(file.root.members.len(), 2);
    match &file.root.members[0] {
        AstMember::Assignment(a) => {
            assert!(a.source.contains("\"a.c\""));
            assert!(a.source.contains("\"b.c\""));
        }
        other => panic!("unexpected member {other:?}"),
    }
}

#[test]
fn operator_at_line_end_continues_expression() {
    let source = "Product {\n    name: \"a\" +\n        \"b\"\n}\n";
    let file = parse_file(source, "/p.keel").unwrap();
    match &file.root.members[0] {
        AstMember::Assignment(a) => assert_eq!(a.source, "\"a\" +\n        \"b\""),
        other => panic!("unexpected member {other:?}"),
    }
}

#[test]
fn script_blocks_have_function_form() {
    let source = "Rule {\n    prepare: {\n        var cmds = [];\n        return cmds;\n    }\n}\n";
    let file = parse_file(source, "/p.keel").unwrap();
    match &file.root.members[0] {
        AstMember::Assignment(a) => {
            assert!(a.has_function_form);
            assert!(a.source.starts_with('{'));
            assert!(a.source.ends_with('}'));
            assert!(a.source.contains("return cmds;"));
        }
        other => panic!("unexpected member {other:?}"),
    }
}

#[test]
fn parse_error_carries_location() {
    let source = "Product {\n    name \"app\"\n}\n";
    let error = parse_file(source, "/p.keel").unwrap_err();
    assert_eq!(error.kind, keel_diagnostic::ErrorKind::Parse);
    assert!(error.to_string().contains("/p.keel:2"));
}

#[test]
fn unclosed_item_is_an_error() {
    let error = parse_file("Product {\n", "/p.keel").unwrap_err();
    assert!(error.to_string().contains("unclosed item"));
}

#[test]
fn lowercase_item_type_is_rejected() {
    let error = parse_file("product {}\n", "/p.keel").unwrap_err();
    assert!(error.to_string().contains("uppercase"));
}

#[test]
fn semicolons_terminate_bindings() {
    let source = "Product { name: \"a\"; type: [\"app\"] }\n";
    let file = parse_file(source, "/p.keel").unwrap();
    assert_eq!(file.root.members.len(), 2);
}
