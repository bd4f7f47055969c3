// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Dotted paths into a document.
//!
//! Change-set paths name wire keys, since they are what the document store understands.
//! Validation paths name attributes. Most paths are one or two segments deep, so the
//! segments live inline.
use smallvec::SmallVec;
use std::fmt;

/// A dotted sequence of keys (and, inside sequences, element indexes).
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct FieldPath(SmallVec<[String; 4]>);

impl FieldPath {
    /// The empty path, naming the document itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// A path with a single segment.
    pub fn key(segment: impl Into<String>) -> Self {
        let mut path = Self::default();
        path.0.push(segment.into());
        path
    }

    /// Returns a copy of this path with `segment` appended.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut path = self.clone();
        path.0.push(segment.into());
        path
    }

    /// Returns a copy of this path with an element index appended.
    #[must_use]
    pub fn index(&self, idx: usize) -> Self {
        self.child(idx.to_string())
    }

    /// Returns `prefix` followed by the segments of `self`.
    #[must_use]
    pub fn prefixed(&self, prefix: &FieldPath) -> Self {
        let mut path = prefix.clone();
        path.0.extend(self.0.iter().cloned());
        path
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.0.iter().map(String::as_str)
    }

    /// The last segment, if any.
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{self}`")
    }
}

impl From<&str> for FieldPath {
    /// Splits a dotted string into segments.
    fn from(value: &str) -> Self {
        Self(value.split('.').map(str::to_string).collect())
    }
}

impl<S: Into<String>> FromIterator<S> for FieldPath {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_with_dots() {
        let path = FieldPath::key("address").child("city");
        assert_eq!(path.to_string(), "address.city");
        assert_eq!(FieldPath::root().to_string(), "<root>");
        assert_eq!(FieldPath::key("tags").index(3).to_string(), "tags.3");
    }

    #[test]
    fn prefixed_keeps_order() {
        let inner = FieldPath::from("b.c");
        let outer = inner.prefixed(&FieldPath::key("a"));
        assert_eq!(outer.segments().collect::<Vec<_>>(), ["a", "b", "c"]);
        assert_eq!(outer.leaf(), Some("c"));
        assert_eq!(outer.len(), 3);
    }
}
