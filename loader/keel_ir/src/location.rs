//! Source code locations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A position in a build description file.
///
/// Lines and columns are 1-based; a location with an empty file path is
/// invalid and renders as `<unknown location>`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeLocation {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
}

impl CodeLocation {
    pub fn new(file_path: impl Into<String>, line: u32, column: u32) -> Self {
        CodeLocation {
            file_path: file_path.into(),
            line,
            column,
        }
    }

    /// A location naming only a file, without line information.
    pub fn file_only(file_path: impl Into<String>) -> Self {
        Self::new(file_path, 0, 0)
    }

    /// An invalid location, used where no source position exists.
    pub fn unknown() -> Self {
        CodeLocation::default()
    }

    pub fn is_valid(&self) -> bool {
        !self.file_path.is_empty()
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "<unknown location>");
        }
        write!(f, "{}", self.file_path)?;
        if self.line > 0 {
            write!(f, ":{}", self.line)?;
            if self.column > 0 {
                write!(f, ":{}", self.column)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_line_and_column() {
        let loc = CodeLocation::new("/p/project.keel", 3, 7);
        assert_eq!(loc.to_string(), "/p/project.keel:3:7");
    }

    #[test]
    fn display_file_only() {
        let loc = CodeLocation::file_only("/p/project.keel");
        assert_eq!(loc.to_string(), "/p/project.keel");
    }

    #[test]
    fn unknown_location_is_invalid() {
        assert!(!CodeLocation::unknown().is_valid());
        assert_eq!(CodeLocation::unknown().to_string(), "<unknown location>");
    }
}
