//! Dotted identifiers for modules and properties.

use std::collections::BTreeSet;
use std::fmt;

use smallvec::SmallVec;

/// A dotted name such as `cpp` or `codegen.tools.linker`.
///
/// Most names have one or two segments, so segments are stored inline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedId(SmallVec<[String; 2]>);

/// An ordered set of qualified ids (deterministic iteration).
pub type QualifiedIdSet = BTreeSet<QualifiedId>;

impl QualifiedId {
    pub fn new() -> Self {
        QualifiedId(SmallVec::new())
    }

    pub fn from_string(s: &str) -> Self {
        QualifiedId(s.split('.').map(str::to_string).collect())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QualifiedId(segments.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    #[must_use]
    pub fn appended(&self, segment: impl Into<String>) -> Self {
        let mut id = self.clone();
        id.0.push(segment.into());
        id
    }

    pub fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }

    pub fn pop_back(&mut self) {
        self.0.pop();
    }

    /// The id without its last segment, e.g. the module part of a
    /// fully-qualified property name.
    #[must_use]
    pub fn parent(&self) -> Self {
        let mut id = self.clone();
        id.0.pop();
        id
    }
}

impl From<&str> for QualifiedId {
    fn from(s: &str) -> Self {
        QualifiedId::from_string(s)
    }
}

impl fmt::Display for QualifiedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let id = QualifiedId::from_string("codegen.tools.linker");
        assert_eq!(id.len(), 3);
        assert_eq!(id.to_string(), "codegen.tools.linker");
        assert_eq!(id.first(), Some("codegen"));
        assert_eq!(id.last(), Some("linker"));
    }

    #[test]
    fn parent_drops_last_segment() {
        let id = QualifiedId::from_string("cpp.defines");
        assert_eq!(id.parent().to_string(), "cpp");
        assert_eq!(id.parent().parent(), QualifiedId::new());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let mut set = QualifiedIdSet::new();
        set.insert(QualifiedId::from_string("b"));
        set.insert(QualifiedId::from_string("a.c"));
        set.insert(QualifiedId::from_string("a"));
        let names: Vec<String> = set.iter().map(QualifiedId::to_string).collect();
        assert_eq!(names, vec!["a", "a.c", "b"]);
    }
}
