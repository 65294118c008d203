//! File tags used to match rule inputs and outputs.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single file tag, e.g. `"cpp"` or `"obj"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileTag(String);

impl FileTag {
    pub fn new(tag: impl Into<String>) -> Self {
        FileTag(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sentinel tag given to artifacts no tagger matched.
    pub fn unknown_file_tag() -> Self {
        FileTag::new("unknown-file-tag")
    }
}

impl From<&str> for FileTag {
    fn from(s: &str) -> Self {
        FileTag::new(s)
    }
}

impl fmt::Display for FileTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered set of file tags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTags(BTreeSet<FileTag>);

impl FileTags {
    pub fn new() -> Self {
        FileTags::default()
    }

    pub fn from_string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FileTags(items.into_iter().map(|s| FileTag::new(s)).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, tag: FileTag) {
        self.0.insert(tag);
    }

    pub fn contains(&self, tag: &FileTag) -> bool {
        self.0.contains(tag)
    }

    pub fn unite(&mut self, other: &FileTags) {
        for tag in &other.0 {
            self.0.insert(tag.clone());
        }
    }

    pub fn intersects(&self, other: &FileTags) -> bool {
        self.0.iter().any(|t| other.contains(t))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileTag> {
        self.0.iter()
    }

    pub fn to_string_list(&self) -> Vec<String> {
        self.0.iter().map(|t| t.0.clone()).collect()
    }
}

impl FromIterator<FileTag> for FileTags {
    fn from_iter<I: IntoIterator<Item = FileTag>>(iter: I) -> Self {
        FileTags(iter.into_iter().collect())
    }
}

impl fmt::Display for FileTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_string_list().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unite_and_intersect() {
        let mut a = FileTags::from_string_list(["cpp", "hpp"]);
        let b = FileTags::from_string_list(["hpp", "obj"]);
        assert!(a.intersects(&b));
        a.unite(&b);
        assert_eq!(a.to_string_list(), vec!["cpp", "hpp", "obj"]);
    }

    #[test]
    fn no_intersection() {
        let a = FileTags::from_string_list(["cpp"]);
        let b = FileTags::from_string_list(["obj"]);
        assert!(!a.intersects(&b));
    }
}
