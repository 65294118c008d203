//! Error records.

use std::fmt;

use keel_ir::CodeLocation;
use thiserror::Error;

/// What kind of failure an [`ErrorInfo`] describes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// Malformed description file; fatal for that file only.
    #[error("parse error")]
    Parse,
    /// Missing file, unknown module, cyclic inheritance, duplicate names.
    #[default]
    #[error("resolve error")]
    Resolve,
    /// A script exception surfaced during property evaluation.
    #[error("evaluation error")]
    Evaluation,
    /// Unknown property assigned via a profile or an override.
    #[error("profile error")]
    Profile,
    /// The progress observer reported cancellation.
    #[error("canceled")]
    Cancelled,
    /// No stored build graph where one was required.
    #[error("not found")]
    NotFound,
    /// Invariant violation inside the loader.
    #[error("internal error")]
    Internal,
}

/// One message of an error, optionally anchored at a source location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorItem {
    pub description: String,
    pub location: CodeLocation,
}

impl ErrorItem {
    pub fn new(description: impl Into<String>, location: CodeLocation) -> Self {
        ErrorItem {
            description: description.into(),
            location,
        }
    }
}

impl fmt::Display for ErrorItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_valid() {
            write!(f, "{}: {}", self.location, self.description)
        } else {
            f.write_str(&self.description)
        }
    }
}

/// A structured, possibly multi-item error.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub items: Vec<ErrorItem>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, description: impl Into<String>, location: CodeLocation) -> Self {
        ErrorInfo {
            kind,
            items: vec![ErrorItem::new(description, location)],
        }
    }

    pub fn parse(description: impl Into<String>, location: CodeLocation) -> Self {
        Self::new(ErrorKind::Parse, description, location)
    }

    pub fn resolve(description: impl Into<String>, location: CodeLocation) -> Self {
        Self::new(ErrorKind::Resolve, description, location)
    }

    pub fn evaluation(description: impl Into<String>, location: CodeLocation) -> Self {
        Self::new(ErrorKind::Evaluation, description, location)
    }

    pub fn profile(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Profile, description, CodeLocation::unknown())
    }

    pub fn cancelled(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, description, CodeLocation::unknown())
    }

    pub fn not_found(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, description, CodeLocation::unknown())
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, description, CodeLocation::unknown())
    }

    /// An empty error for incremental accumulation.
    pub fn empty() -> Self {
        ErrorInfo::default()
    }

    pub fn has_error(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Appends a further message to this error.
    pub fn append(&mut self, description: impl Into<String>, location: CodeLocation) {
        self.items.push(ErrorItem::new(description, location));
    }

    /// Merges another error's items into this one. The first merged error
    /// decides the kind of an empty accumulator.
    pub fn append_error(&mut self, other: ErrorInfo) {
        if self.items.is_empty() {
            self.kind = other.kind;
        }
        self.items.extend(other.items);
    }

    /// Prepends a context message, keeping the existing items as details.
    #[must_use]
    pub fn prepended(self, description: impl Into<String>, location: CodeLocation) -> Self {
        let mut items = vec![ErrorItem::new(description, location)];
        items.extend(self.items);
        ErrorInfo {
            kind: self.kind,
            items,
        }
    }

    /// The location of the first item, if any.
    pub fn location(&self) -> CodeLocation {
        self.items
            .first()
            .map(|item| item.location.clone())
            .unwrap_or_default()
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInfo {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn multi_item_display() {
        let mut error = ErrorInfo::resolve(
            "Duplicate product name 'app'.",
            CodeLocation::unknown(),
        );
        error.append(
            "First product defined here.",
            CodeLocation::new("/a.keel", 2, 1),
        );
        error.append(
            "Second product defined here.",
            CodeLocation::new("/b.keel", 5, 1),
        );
        assert_eq!(
            error.to_string(),
            "Duplicate product name 'app'.\n\
             /a.keel:2:1: First product defined here.\n\
             /b.keel:5:1: Second product defined here."
        );
    }

    #[test]
    fn append_error_adopts_kind() {
        let mut acc = ErrorInfo::empty();
        assert!(!acc.has_error());
        acc.append_error(ErrorInfo::parse("bad token", CodeLocation::new("/f", 1, 2)));
        assert_eq!(acc.kind, ErrorKind::Parse);
        acc.append_error(ErrorInfo::resolve("missing", CodeLocation::unknown()));
        assert_eq!(acc.kind, ErrorKind::Parse);
        assert_eq!(acc.items.len(), 2);
    }

    #[test]
    fn prepended_keeps_details() {
        let error = ErrorInfo::resolve("inner", CodeLocation::new("/f", 1, 1))
            .prepended("Error while handling product 'app':", CodeLocation::unknown());
        assert_eq!(error.items.len(), 2);
        assert_eq!(error.items[0].description, "Error while handling product 'app':");
        assert_eq!(error.items[1].description, "inner");
    }

    #[test]
    fn cancellation_is_distinct() {
        let error = ErrorInfo::cancelled("Project resolving canceled.");
        assert!(error.is_cancellation());
        assert!(!ErrorInfo::resolve("x", CodeLocation::unknown()).is_cancellation());
    }
}
