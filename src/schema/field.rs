// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Field descriptors.
//!
//! A [`Field`] describes one named slot of a [`Schema`]: its [`FieldKind`], the wire key it is
//! stored under, whether it is required, its default, and an ordered list of validators.
//! Fields are immutable once their schema is built.
use super::Schema;
use crate::{
    codec,
    error::ValidationError,
    path::FieldPath,
    value::{Value, ValueMap},
    wire::{ReferenceToken, WireValue},
};
use std::{borrow::Cow, fmt, sync::Arc};
use ulid::Ulid;

/// The type of a field.
#[derive(Clone)]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    Binary,
    DateTime,
    /// A [`Ulid`] identifier.
    Id,
    /// A nested document stored inline.
    Embedded(Arc<Schema>),
    /// An ordered sequence of values of the inner kind.
    List(Box<FieldKind>),
    /// A string-keyed mapping to values of the inner kind.
    Map(Box<FieldKind>),
    /// A pointer-by-identity to a document of the named type.
    Reference(String),
    /// Untyped data, validated only for wire compatibility.
    Dynamic,
}

impl FieldKind {
    pub fn list_of(inner: FieldKind) -> Self {
        FieldKind::List(Box::new(inner))
    }

    pub fn map_of(inner: FieldKind) -> Self {
        FieldKind::Map(Box::new(inner))
    }

    /// Whether values of this kind are containers that must never be shared between
    /// instances.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            FieldKind::Embedded(_) | FieldKind::List(_) | FieldKind::Map(_) | FieldKind::Dynamic
        )
    }

    pub(crate) fn describe(&self) -> Cow<'static, str> {
        match self {
            FieldKind::String => "string".into(),
            FieldKind::Int => "int".into(),
            FieldKind::Float => "float".into(),
            FieldKind::Bool => "bool".into(),
            FieldKind::Binary => "binary".into(),
            FieldKind::DateTime => "datetime".into(),
            FieldKind::Id => "id".into(),
            FieldKind::Embedded(schema) => format!("embedded {}", schema.name()).into(),
            FieldKind::List(inner) => format!("list of {}", inner.describe()).into(),
            FieldKind::Map(inner) => format!("map of {}", inner.describe()).into(),
            FieldKind::Reference(target) => format!("reference to {target}").into(),
            FieldKind::Dynamic => "dynamic".into(),
        }
    }

    /// Coerces `value` into this kind.
    ///
    /// Coercion only ever widens (int to float) or parses (string to identifier, string to
    /// datetime, bare identity to reference); it never truncates.
    pub(crate) fn coerce(&self, value: Value, path: &FieldPath) -> Result<Value, ValidationError> {
        let mismatch = |value: &Value| {
            ValidationError::new(
                path.clone(),
                format!("expected {}, got {}", self.describe(), value.type_name()),
            )
        };
        Ok(match (self, value) {
            (FieldKind::String, v @ Value::String(_)) => v,
            (FieldKind::Int, v @ Value::Int(_)) => v,
            (FieldKind::Float, v @ Value::Float(_)) => v,
            #[allow(clippy::cast_precision_loss)]
            (FieldKind::Float, Value::Int(i)) => Value::Float(i as f64),
            (FieldKind::Bool, v @ Value::Bool(_)) => v,
            (FieldKind::Binary, v @ Value::Binary(_)) => v,
            (FieldKind::DateTime, v @ Value::DateTime(_)) => v,
            #[cfg(feature = "chrono")]
            (FieldKind::DateTime, Value::String(s)) => Value::DateTime(
                s.parse()
                    .map_err(|e| ValidationError::new(path.clone(), format!("{e}")))?,
            ),
            (FieldKind::Id, v @ Value::Id(_)) => v,
            (FieldKind::Id, Value::String(s)) => Value::Id(Ulid::from_string(&s).map_err(|e| {
                ValidationError::new(path.clone(), format!("invalid identifier {s:?}: {e}"))
            })?),
            // embedded documents decode with the declared schema, so subclasses would lose
            // their own fields on the way back
            (FieldKind::Embedded(schema), Value::Embedded(state)) => {
                if state.schema().class_name() != schema.class_name() {
                    return Err(ValidationError::new(
                        path.clone(),
                        format!(
                            "expected embedded {}, got embedded {}",
                            schema.name(),
                            state.schema().name()
                        ),
                    ));
                }
                Value::Embedded(state)
            }
            (FieldKind::List(inner), Value::List(items)) => Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| inner.coerce(item, &path.index(i)))
                    .collect::<Result<_, _>>()?,
            ),
            (FieldKind::Map(inner), Value::Map(entries)) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        let v = inner.coerce(v, &path.child(k.as_str()))?;
                        Ok((k, v))
                    })
                    .collect::<Result<ValueMap, ValidationError>>()?,
            ),
            (FieldKind::Reference(target), Value::Reference(token)) => {
                if !refers_to(&token, target) {
                    return Err(ValidationError::new(
                        path.clone(),
                        format!(
                            "expected reference to {target}, got reference to {}",
                            token.document()
                        ),
                    ));
                }
                Value::Reference(token)
            }
            (FieldKind::Reference(target), Value::Id(id)) => {
                Value::Reference(ReferenceToken::new(target.as_str(), id))
            }
            (FieldKind::Reference(target), Value::String(id)) => {
                Value::Reference(ReferenceToken::new(target.as_str(), id))
            }
            (FieldKind::Reference(target), Value::Int(id)) => {
                Value::Reference(ReferenceToken::new(target.as_str(), id))
            }
            (FieldKind::Dynamic, value) => Value::Dynamic(codec::untyped(&value)),
            (_, value) => return Err(mismatch(&value)),
        })
    }
}

/// A reference token may point at the declared type or at one of its subclasses, whose type
/// names are dotted extensions of the parent's (`Person.Employee`).
fn refers_to(token: &ReferenceToken, target: &str) -> bool {
    let document = token.document();
    document == target
        || document
            .strip_prefix(target)
            .is_some_and(|rest| rest.starts_with('.'))
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl PartialEq for FieldKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldKind::Embedded(a), FieldKind::Embedded(b)) => {
                Arc::ptr_eq(a, b) || a.class_name() == b.class_name()
            }
            (FieldKind::List(a), FieldKind::List(b)) | (FieldKind::Map(a), FieldKind::Map(b)) => {
                a == b
            }
            (FieldKind::Reference(a), FieldKind::Reference(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

/// Where a field's default comes from.
#[derive(Clone)]
pub enum DefaultValue {
    /// A literal; every use gets its own deep copy.
    Value(Value),
    /// A producer, called once per use.
    Fn(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            DefaultValue::Fn(_) => f.write_str("Fn(..)"),
        }
    }
}

/// A predicate with the message reported when it rejects a value.
#[derive(Clone)]
pub struct Validator {
    predicate: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
    message: Cow<'static, str>,
}

impl Validator {
    pub fn new(
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            predicate: Arc::new(predicate),
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn accepts(&self, value: &Value) -> bool {
        (self.predicate)(value)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Describes one named attribute of a document.
///
/// ```rust
/// # use docmap::schema::Field;
/// let age = Field::int("age")
///     .required()
///     .validate(|v| v.as_i64().is_some_and(|age| age >= 0), "age must not be negative");
/// assert_eq!(age.wire_key(), "age");
/// ```
#[derive(Clone, Debug)]
pub struct Field {
    name: String,
    wire_key: Option<String>,
    kind: FieldKind,
    required: bool,
    identity: bool,
    catch_all: bool,
    default: Option<DefaultValue>,
    choices: Option<Vec<Value>>,
    validators: Vec<Validator>,
}

macro_rules! scalar_constructors {
    ($($fn_name:ident => $kind:ident),* $(,)?) => {
        $(
            #[doc = concat!("A field of kind [`FieldKind::", stringify!($kind), "`].")]
            pub fn $fn_name(name: impl Into<String>) -> Self {
                Self::new(name, FieldKind::$kind)
            }
        )*
    };
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            wire_key: None,
            kind,
            required: false,
            identity: false,
            catch_all: false,
            default: None,
            choices: None,
            validators: Vec::new(),
        }
    }

    scalar_constructors!(
        string => String,
        int => Int,
        float => Float,
        bool => Bool,
        binary => Binary,
        datetime => DateTime,
        id => Id,
        dynamic => Dynamic,
    );

    pub fn embedded(name: impl Into<String>, schema: &Arc<Schema>) -> Self {
        Self::new(name, FieldKind::Embedded(Arc::clone(schema)))
    }

    pub fn list(name: impl Into<String>, inner: FieldKind) -> Self {
        Self::new(name, FieldKind::list_of(inner))
    }

    pub fn map(name: impl Into<String>, inner: FieldKind) -> Self {
        Self::new(name, FieldKind::map_of(inner))
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Reference(target.into()))
    }

    /// Stores the field under `key` on the wire instead of under its name.
    #[must_use]
    pub fn db_field(mut self, key: impl Into<String>) -> Self {
        self.wire_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks this field as the document's identity (primary key).
    ///
    /// The identity is always stored under `_id`.
    #[must_use]
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    /// Marks a dynamic field as the bucket that collects wire keys the schema does not declare.
    #[must_use]
    pub fn catch_all(mut self) -> Self {
        self.catch_all = true;
        self
    }

    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    #[must_use]
    pub fn default_with(mut self, producer: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = Some(DefaultValue::Fn(Arc::new(producer)));
        self
    }

    /// Restricts values to one of `choices`.
    #[must_use]
    pub fn choices<T: Into<Value>>(mut self, choices: impl IntoIterator<Item = T>) -> Self {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    /// Appends a validator; validators run in declaration order.
    #[must_use]
    pub fn validate(
        mut self,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.validators.push(Validator::new(predicate, message));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The key this field is stored under on the wire.
    pub fn wire_key(&self) -> &str {
        self.wire_key.as_deref().unwrap_or(&self.name)
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn is_catch_all(&self) -> bool {
        self.catch_all
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub(crate) fn has_explicit_wire_key(&self) -> bool {
        self.wire_key.is_some()
    }

    pub(crate) fn set_wire_key(&mut self, key: &str) {
        self.wire_key = Some(key.to_string());
    }

    pub(crate) fn replace_default(&mut self, default: DefaultValue) {
        self.default = Some(default);
    }

    pub(crate) fn default_source(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    /// Coerces `value` to this field's kind, then checks choices and validators in order,
    /// stopping at the first failure.
    ///
    /// Pure: the field is not changed and nothing else is observed.
    pub fn validate_value(&self, value: Value) -> Result<Value, ValidationError> {
        let path = FieldPath::key(self.name.as_str());
        let value = self.kind.coerce(value, &path)?;
        // the catch-all's entries are spread over the top level of the document
        if self.catch_all && !matches!(value, Value::Dynamic(WireValue::Document(_))) {
            return Err(ValidationError::new(
                path,
                format!(
                    "a catch-all field holds a document of extra keys, got {}",
                    codec::untyped(&value).wire_type()
                ),
            ));
        }
        if let Some(choices) = &self.choices {
            if !choices.contains(&value) {
                return Err(ValidationError::new(
                    path,
                    format!("value must be one of {}", render_choices(choices)),
                ));
            }
        }
        if let Some(failed) = self.validators.iter().find(|v| !v.accepts(&value)) {
            return Err(ValidationError::new(path, failed.message.clone()));
        }
        Ok(value)
    }

    /// Produces a fresh default value, or `None` if the field has no default.
    ///
    /// Literal defaults are deep-copied, so containers are never shared between instances.
    pub fn default_value(&self) -> Result<Option<Value>, ValidationError> {
        match &self.default {
            None => Ok(None),
            // literal defaults were validated when the schema was built
            Some(DefaultValue::Value(v)) => Ok(Some(v.clone())),
            Some(DefaultValue::Fn(producer)) => self.validate_value(producer()).map(Some),
        }
    }
}

fn render_choices(choices: &[Value]) -> String {
    let rendered: Vec<String> = choices
        .iter()
        .map(|c| codec::untyped(c).to_string())
        .collect();
    format!("[{}]", rendered.join(", "))
}
