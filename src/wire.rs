// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The wire representation exchanged with the document store.
//!
//! A [`WireValue`] is the dynamically-typed, recursively nested value a document database
//! accepts and returns unchanged (think BSON). It is the target of [`encode`](crate::codec::encode)
//! and the source of [`decode`](crate::codec::decode). A top-level record is a
//! [`WireDocument`]: an insertion-ordered mapping of wire keys to values.
//!
//! Floats compare by [`f64::total_cmp`], which makes equality reflexive (`NaN == NaN`) and
//! lets `WireValue` implement [`Eq`] and [`Hash`]. Identity values are used as cache keys by
//! the reference resolver, so this matters.
use crate::timestamp::Timestamp;
use indexmap::IndexMap;
use std::{
    fmt,
    hash::{BuildHasher, Hash, Hasher},
};
use ulid::Ulid;

/// A wire-level document: an ordered mapping from wire key to value.
pub type WireDocument = IndexMap<String, WireValue, ahash::RandomState>;

/// Creates an empty [`WireDocument`] sized for `capacity` keys.
pub fn document_with_capacity(capacity: usize) -> WireDocument {
    IndexMap::with_capacity_and_hasher(capacity, ahash::RandomState::default())
}

/// A value in the store's native document format.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    // NOTE: serde_bytes keeps binary compact for formats that have a native byte type.
    Binary(#[cfg_attr(feature = "serde", serde(with = "serde_bytes"))] Vec<u8>),
    DateTime(Timestamp),
    Id(Ulid),
    Array(Vec<WireValue>),
    Document(WireDocument),
    Reference(ReferenceToken),
}

/// The shape of a [`WireValue`] without its data. Used in diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WireType {
    Null,
    Bool,
    Int,
    Float,
    String,
    Binary,
    DateTime,
    Id,
    Array,
    Document,
    Reference,
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WireType::Null => "null",
            WireType::Bool => "bool",
            WireType::Int => "int",
            WireType::Float => "float",
            WireType::String => "string",
            WireType::Binary => "binary",
            WireType::DateTime => "datetime",
            WireType::Id => "id",
            WireType::Array => "array",
            WireType::Document => "document",
            WireType::Reference => "reference",
        })
    }
}

/// An opaque pointer-by-identity to a document of another type.
///
/// The token is never resolved by the codec; see [`crate::reference`] for lazy resolution.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct ReferenceToken {
    document: String,
    id: Box<WireValue>,
}

impl ReferenceToken {
    pub fn new(document: impl Into<String>, id: impl Into<WireValue>) -> Self {
        Self {
            document: document.into(),
            id: Box::new(id.into()),
        }
    }

    /// The type name of the referenced document.
    pub fn document(&self) -> &str {
        &self.document
    }

    /// The identity value of the referenced document.
    pub fn id(&self) -> &WireValue {
        &self.id
    }
}

impl fmt::Display for ReferenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.document, self.id)
    }
}

impl WireValue {
    pub fn wire_type(&self) -> WireType {
        match self {
            WireValue::Null => WireType::Null,
            WireValue::Bool(_) => WireType::Bool,
            WireValue::Int(_) => WireType::Int,
            WireValue::Float(_) => WireType::Float,
            WireValue::String(_) => WireType::String,
            WireValue::Binary(_) => WireType::Binary,
            WireValue::DateTime(_) => WireType::DateTime,
            WireValue::Id(_) => WireType::Id,
            WireValue::Array(_) => WireType::Array,
            WireValue::Document(_) => WireType::Document,
            WireValue::Reference(_) => WireType::Reference,
        }
    }

    /// Collects `items` into a [`WireValue::Array`].
    pub fn array<T: Into<WireValue>>(items: impl IntoIterator<Item = T>) -> Self {
        WireValue::Array(items.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WireValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            WireValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&WireDocument> {
        match self {
            WireValue::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ReferenceToken> {
        match self {
            WireValue::Reference(r) => Some(r),
            _ => None,
        }
    }
}

impl PartialEq for WireValue {
    fn eq(&self, other: &Self) -> bool {
        use WireValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.total_cmp(b).is_eq(),
            (String(a), String(b)) => a == b,
            (Binary(a), Binary(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (Id(a), Id(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Document(a), Document(b)) => a == b,
            (Reference(a), Reference(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for WireValue {}

impl Hash for WireValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.wire_type().hash(state);
        match self {
            WireValue::Null => {}
            WireValue::Bool(b) => b.hash(state),
            WireValue::Int(i) => i.hash(state),
            WireValue::Float(f) => f.to_bits().hash(state),
            WireValue::String(s) => s.hash(state),
            WireValue::Binary(b) => b.hash(state),
            WireValue::DateTime(t) => t.hash(state),
            WireValue::Id(u) => u.hash(state),
            WireValue::Array(a) => a.hash(state),
            // document equality ignores key order, so entries are hashed alone and summed
            WireValue::Document(d) => {
                let entries = ahash::RandomState::with_seeds(0, 0, 0, 0);
                let combined = d
                    .iter()
                    .fold(0u64, |acc, entry| acc.wrapping_add(entries.hash_one(entry)));
                d.len().hash(state);
                combined.hash(state);
            }
            WireValue::Reference(r) => r.hash(state),
        }
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireValue::Null => f.write_str("null"),
            WireValue::Bool(b) => write!(f, "{b}"),
            WireValue::Int(i) => write!(f, "{i}"),
            WireValue::Float(v) => write!(f, "{v:?}"),
            WireValue::String(s) => write!(f, "{s:?}"),
            WireValue::Binary(b) => write!(f, "Binary({b:02X?})"),
            WireValue::DateTime(t) => write!(f, "Date({t})"),
            WireValue::Id(u) => write!(f, "Id({u})"),
            WireValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            WireValue::Document(doc) => {
                f.write_str("{")?;
                for (i, (key, value)) in doc.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str("}")
            }
            WireValue::Reference(r) => write!(f, "Ref({r})"),
        }
    }
}

macro_rules! impl_from {
    (
        $(
            $source:ty => $target:ident $(with $conv:ident)?
        ),* $(,)?
    ) => {
        $(
            impl From<$source> for WireValue {
                fn from(value: $source) -> Self {
                    Self::$target(impl_from!(value$(, $conv)?))
                }
            }
        )*
    };

    ($value:ident, $conv:ident) => {
        $value.$conv()
    };

    ($value:ident) => {
        $value
    };
}

impl_from!(
    bool        => Bool,
    i8          => Int with into,
    i16         => Int with into,
    i32         => Int with into,
    i64         => Int,
    u8          => Int with into,
    u16         => Int with into,
    u32         => Int with into,
    f32         => Float with into,
    f64         => Float,
    String      => String,
    &str        => String with to_string,
    Vec<u8>     => Binary,
    &[u8]       => Binary with to_vec,
    Timestamp   => DateTime,
    Ulid        => Id,
    WireDocument => Document,
    ReferenceToken => Reference,
);

impl<T: Into<WireValue>> From<Option<T>> for WireValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(WireValue::Null, Into::into)
    }
}

impl PartialEq<str> for WireValue {
    fn eq(&self, other: &str) -> bool {
        matches!(self, Self::String(s) if s == other)
    }
}

impl PartialEq<&str> for WireValue {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, Self::String(s) if s == other)
    }
}

impl PartialEq<i64> for WireValue {
    fn eq(&self, other: &i64) -> bool {
        matches!(self, Self::Int(i) if i == other)
    }
}

// i32 because it's the "default" inference integer type
impl PartialEq<i32> for WireValue {
    fn eq(&self, other: &i32) -> bool {
        matches!(self, Self::Int(i) if *i == i64::from(*other))
    }
}

impl PartialEq<bool> for WireValue {
    fn eq(&self, other: &bool) -> bool {
        matches!(self, Self::Bool(b) if b == other)
    }
}

impl PartialEq<f64> for WireValue {
    fn eq(&self, other: &f64) -> bool {
        matches!(self, Self::Float(f) if f.total_cmp(other).is_eq())
    }
}
