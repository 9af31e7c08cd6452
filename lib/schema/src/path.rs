use rdf_odm_model::{ID_FIELD, TYPE_FIELD};
use std::fmt::{Display, Formatter};

/// A dotted property path, such as `author.name`, relative to some model.
///
/// The empty path addresses the document itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyPath {
    segments: Vec<String>,
}

impl PropertyPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Splits `path` on `.`. Empty segments are skipped.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The path without its last segment. The parent of the root is the root.
    #[must_use]
    pub fn parent(&self) -> Self {
        let end = self.segments.len().saturating_sub(1);
        Self {
            segments: self.segments[..end].to_vec(),
        }
    }

    /// The first `len` segments of this path.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }

    /// Appends `other`, which is relative to the entity this path points at.
    #[must_use]
    pub fn join(&self, other: &PropertyPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Returns true if the path addresses the identity of the entity reached by its parent.
    pub fn is_identity(&self) -> bool {
        self.last() == Some(ID_FIELD)
    }

    /// Returns true if the path addresses the type of the entity reached by its parent.
    pub fn is_type(&self) -> bool {
        self.last() == Some(TYPE_FIELD)
    }
}

impl Display for PropertyPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl From<&str> for PropertyPath {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}
