//! Untyped AST for description files.
//!
//! The parser stops at the item structure; right-hand sides stay raw source
//! text, evaluated later against the proper scope chain.

use keel_ir::CodeLocation;

/// A parsed description file.
#[derive(Debug)]
pub struct AstFile {
    pub imports: Vec<AstImport>,
    pub root: AstItem,
}

/// An `import` statement.
#[derive(Debug, PartialEq, Eq)]
pub enum AstImport {
    /// `import keel.FileInfo` — binds a built-in extension.
    Extension { name: String, location: CodeLocation },
    /// `import "scripts/util.js" as Util` — binds a script file or a
    /// directory of script files.
    File {
        path: String,
        alias: String,
        location: CodeLocation,
    },
}

/// One item block: `TypeName { ... }`.
#[derive(Debug)]
pub struct AstItem {
    pub type_name: String,
    pub location: CodeLocation,
    pub members: Vec<AstMember>,
}

/// A member inside an item block.
#[derive(Debug)]
pub enum AstMember {
    /// `id: someName`
    Id { name: String, location: CodeLocation },
    /// `name: expr` or `a.b.c: expr`
    Assignment(AstAssignment),
    /// `property string foo: expr`
    Declaration(AstDeclaration),
    /// A nested item block.
    Child(AstItem),
}

/// A property assignment with its raw right-hand side.
#[derive(Debug)]
pub struct AstAssignment {
    /// Dotted name path, e.g. `["cpp", "defines"]`.
    pub name_parts: Vec<String>,
    pub name_location: CodeLocation,
    /// Raw source of the right-hand side.
    pub source: String,
    pub source_location: CodeLocation,
    /// True when the right-hand side is a `{ ... }` script block rather
    /// than an expression.
    pub has_function_form: bool,
}

/// A `property <type> <name>[: default]` declaration.
#[derive(Debug)]
pub struct AstDeclaration {
    pub name: String,
    pub type_name: String,
    pub location: CodeLocation,
    /// Raw default expression, if one was given.
    pub source: Option<String>,
    pub source_location: CodeLocation,
}
