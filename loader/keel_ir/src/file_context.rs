//! Per-file import and source information.

use std::rc::Rc;

use crate::CodeLocation;

/// A single `import ... as Name` statement resolved to concrete files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsImport {
    /// The name the import binds in the file's import scope.
    pub scope_name: String,
    /// The script files backing the binding (one for a file import,
    /// several for a directory import).
    pub file_paths: Vec<String>,
    pub location: CodeLocation,
}

/// Immutable context shared by every item and value read from one file.
#[derive(Debug, Default)]
pub struct FileContext {
    pub file_path: String,
    /// Directory containing the file; base for relative references.
    pub dir_path: String,
    /// The raw source text, kept for export-surface extraction.
    pub content: String,
    /// File-backed imports, in source order.
    pub js_imports: Vec<JsImport>,
    /// Built-in extension imports (`import keel.X`), in source order.
    pub extension_imports: Vec<(String, CodeLocation)>,
    /// Search paths that were active when the file was read.
    pub search_paths: Vec<String>,
}

pub type FileContextPtr = Rc<FileContext>;

impl FileContext {
    pub fn new(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        let file_path = file_path.into();
        let dir_path = crate::fileinfo::path(&file_path);
        FileContext {
            file_path,
            dir_path,
            content: content.into(),
            ..FileContext::default()
        }
    }

    /// The source line at a 1-based line number, used when capturing import
    /// statements verbatim for exported modules.
    pub fn line_at(&self, line: u32) -> Option<&str> {
        if line == 0 {
            return None;
        }
        self.content.lines().nth(line as usize - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_path_is_derived() {
        let ctx = FileContext::new("/proj/sub/app.keel", "");
        assert_eq!(ctx.dir_path, "/proj/sub");
    }

    #[test]
    fn line_lookup() {
        let ctx = FileContext::new("/p.keel", "first\nsecond\nthird");
        assert_eq!(ctx.line_at(2), Some("second"));
        assert_eq!(ctx.line_at(0), None);
        assert_eq!(ctx.line_at(9), None);
    }
}
