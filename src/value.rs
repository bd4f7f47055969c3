// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Typed in-memory values.
//!
//! A [`Value`] is what application code reads from and writes to a document. Unlike a
//! [`WireValue`], it knows about embedded documents (as nested [`InstanceState`]s) and its
//! variants line up one-to-one with [`FieldKind`](crate::schema::FieldKind)s.
//!
//! Absence is not a value: reading an unset field without a default yields `None`.
use crate::{
    state::InstanceState,
    timestamp::Timestamp,
    wire::{ReferenceToken, WireValue},
};
use indexmap::IndexMap;
use ulid::Ulid;

/// String-keyed, insertion-ordered map of values.
pub type ValueMap = IndexMap<String, Value, ahash::RandomState>;

/// A typed value held by an [`InstanceState`].
#[derive(Clone, Debug)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Binary(Vec<u8>),
    DateTime(Timestamp),
    Id(Ulid),
    Embedded(Box<InstanceState>),
    List(Vec<Value>),
    Map(ValueMap),
    Reference(ReferenceToken),
    /// Untyped data held by a dynamic field; only checked for wire compatibility.
    Dynamic(WireValue),
}

impl Value {
    /// Collects `items` into a [`Value::List`].
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Collects `entries` into a [`Value::Map`].
    pub fn map<K: Into<String>, T: Into<Value>>(entries: impl IntoIterator<Item = (K, T)>) -> Self {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// A short name for the variant, used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Binary(_) => "binary",
            Value::DateTime(_) => "datetime",
            Value::Id(_) => "id",
            Value::Embedded(_) => "embedded document",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Reference(_) => "reference",
            Value::Dynamic(_) => "dynamic",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<Timestamp> {
        match self {
            Value::DateTime(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<Ulid> {
        match self {
            Value::Id(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_embedded(&self) -> Option<&InstanceState> {
        match self {
            Value::Embedded(state) => Some(&**state),
            _ => None,
        }
    }

    pub fn as_embedded_mut(&mut self) -> Option<&mut InstanceState> {
        match self {
            Value::Embedded(state) => Some(&mut **state),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ReferenceToken> {
        match self {
            Value::Reference(token) => Some(token),
            _ => None,
        }
    }

    pub fn as_dynamic(&self) -> Option<&WireValue> {
        match self {
            Value::Dynamic(wire) => Some(wire),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (String(a), String(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.total_cmp(b).is_eq(),
            (Bool(a), Bool(b)) => a == b,
            (Binary(a), Binary(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (Id(a), Id(b)) => a == b,
            (Embedded(a), Embedded(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Reference(a), Reference(b)) => a == b,
            (Dynamic(a), Dynamic(b)) => a == b,
            _ => false,
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
            impl From<$source> for Value {
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
    String         => String,
    &str           => String with to_string,
    i8             => Int with into,
    i16            => Int with into,
    i32            => Int with into,
    i64            => Int,
    u8             => Int with into,
    u16            => Int with into,
    u32            => Int with into,
    f32            => Float with into,
    f64            => Float,
    bool           => Bool,
    Vec<u8>        => Binary,
    &[u8]          => Binary with to_vec,
    Timestamp      => DateTime,
    Ulid           => Id,
    ReferenceToken => Reference,
    ValueMap       => Map,
    WireValue      => Dynamic,
);

impl From<InstanceState> for Value {
    fn from(state: InstanceState) -> Self {
        Value::Embedded(Box::new(state))
    }
}

impl PartialEq<str> for Value {
    fn eq(&self, other: &str) -> bool {
        matches!(self, Self::String(s) if s == other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, Self::String(s) if s == other)
    }
}

impl PartialEq<i64> for Value {
    fn eq(&self, other: &i64) -> bool {
        matches!(self, Self::Int(i) if i == other)
    }
}

// i32 because it's the "default" inference integer type
impl PartialEq<i32> for Value {
    fn eq(&self, other: &i32) -> bool {
        matches!(self, Self::Int(i) if *i == i64::from(*other))
    }
}

impl PartialEq<f64> for Value {
    fn eq(&self, other: &f64) -> bool {
        matches!(self, Self::Float(f) if f.total_cmp(other).is_eq())
    }
}

impl PartialEq<bool> for Value {
    fn eq(&self, other: &bool) -> bool {
        matches!(self, Self::Bool(b) if b == other)
    }
}
