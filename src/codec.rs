// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Conversion between typed instances and wire documents.
//!
//! [`encode`] walks the schema in declaration order and produces the full wire document of an
//! [`InstanceState`]. Slots that were never decoded are copied straight from the baseline
//! without being decoded first. References are written as their token, never as the resolved
//! target.
//!
//! [`decode`] makes a single pass over the wire document's keys: each key is resolved to a
//! field with one lookup, its top-level wire type is checked against the field's kind, and the
//! slot is marked as stored. Nested structures are decoded only when the field is first read
//! (see [`Materialize`]). Deeper shape mismatches therefore surface as [`DecodeError`]s on
//! access rather than at load.
//!
//! ```rust
//! # use docmap::{codec, schema::{Field, Schema}, state::InstanceState, wire_doc};
//! let person = Schema::builder("Person")
//!     .field(Field::string("name"))
//!     .field(Field::int("age"))
//!     .build()
//!     .unwrap();
//!
//! let mut ann = InstanceState::new(person.clone()).unwrap();
//! ann.set("name", "Ann").unwrap();
//! ann.set("age", 30).unwrap();
//! let wire = codec::encode(&ann).unwrap();
//! assert_eq!(wire, wire_doc! { "name" => "Ann", "age" => 30 });
//!
//! let mut loaded = codec::decode(&person, wire).unwrap();
//! assert_eq!(loaded.get("age").unwrap().unwrap(), &30);
//! ```
use crate::{
    error::{DecodeError, Error},
    path::FieldPath,
    schema::{CLASS_KEY, FieldKind, Schema, UnknownFields},
    state::{InstanceState, Slot},
    value::{Value, ValueMap},
    wire::{self, ReferenceToken, WireDocument, WireValue},
};
use std::sync::Arc;
use tracing::trace;
use ulid::Ulid;

/// When nested values are decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Materialize {
    /// On first access, memoized thereafter.
    #[default]
    Lazy,
    /// Everything, recursively, during [`decode`].
    Eager,
}

/// Knobs for [`decode_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DecodeOptions {
    pub materialize: Materialize,
    /// Overrides the schema's own [`UnknownFields`] policy.
    pub unknown_fields: Option<UnknownFields>,
}

impl DecodeOptions {
    pub fn eager() -> Self {
        Self {
            materialize: Materialize::Eager,
            ..Self::default()
        }
    }
}

/// Encodes the full wire document of `state`.
///
/// Fails with [`Error::MissingField`] if a required field is unset; no partial document is
/// produced in that case.
pub fn encode(state: &InstanceState) -> Result<WireDocument, Error> {
    encode_state(state, &FieldPath::root(), true)
}

/// Like [`encode`], but leaves out missing required fields instead of failing. Used for
/// content comparison and diagnostics.
pub(crate) fn encode_lenient(state: &InstanceState) -> WireDocument {
    // with the required-field check disabled only a producer default that fails validation
    // can get here, and such a state has no faithful encoding anyway
    encode_state(state, &FieldPath::root(), false).unwrap_or_default()
}

/// Converts a typed value into its wire form, leaving out missing required fields of embedded
/// documents.
pub fn untyped(value: &Value) -> WireValue {
    encode_value(value, &FieldPath::root(), false).unwrap_or(WireValue::Null)
}

fn encode_state(
    state: &InstanceState,
    at: &FieldPath,
    strict: bool,
) -> Result<WireDocument, Error> {
    let schema = state.schema();
    let mut doc = wire::document_with_capacity(schema.len() + 1);
    if schema.allows_inheritance() {
        doc.insert(CLASS_KEY.to_string(), schema.class_name().into());
    }
    let mut extras = None;
    for (idx, field) in schema.fields().iter().enumerate() {
        let encoded = match state.slot(idx) {
            Slot::Stored => state.stored_value(field).cloned(),
            Slot::Loaded(value) => Some(encode_value(value, &at.child(field.name()), strict)?),
            Slot::Absent => match field.default_value()? {
                Some(default) => Some(encode_value(&default, &at.child(field.name()), strict)?),
                None if strict && field.is_required() => {
                    return Err(Error::MissingField {
                        path: at.child(field.name()),
                    });
                }
                None => None,
            },
        };
        match encoded {
            Some(WireValue::Document(entries)) if schema.catch_all_index() == Some(idx) => {
                extras = Some(entries);
            }
            Some(value) => {
                doc.insert(field.wire_key().to_string(), value);
            }
            None => {}
        }
    }
    // unknown keys live at the top level, after the declared fields
    for (key, value) in extras.into_iter().flatten() {
        doc.entry(key).or_insert(value);
    }
    Ok(doc)
}

pub(crate) fn encode_value(value: &Value, at: &FieldPath, strict: bool) -> Result<WireValue, Error> {
    Ok(match value {
        Value::String(s) => WireValue::String(s.clone()),
        Value::Int(i) => WireValue::Int(*i),
        Value::Float(f) => WireValue::Float(*f),
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Binary(b) => WireValue::Binary(b.clone()),
        Value::DateTime(t) => WireValue::DateTime(*t),
        Value::Id(u) => WireValue::Id(*u),
        Value::Embedded(state) => WireValue::Document(encode_state(state, at, strict)?),
        Value::List(items) => WireValue::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| encode_value(item, &at.index(i), strict))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(entries) => {
            let mut doc = wire::document_with_capacity(entries.len());
            for (key, item) in entries {
                doc.insert(key.clone(), encode_value(item, &at.child(key.as_str()), strict)?);
            }
            WireValue::Document(doc)
        }
        Value::Reference(token) => WireValue::Reference(token.clone()),
        Value::Dynamic(wire) => wire.clone(),
    })
}

/// Decodes `wire` into a lazily materialized state.
pub fn decode(schema: &Arc<Schema>, wire: WireDocument) -> Result<InstanceState, Error> {
    decode_with(schema, wire, DecodeOptions::default())
}

/// Decodes `wire` with explicit [`DecodeOptions`].
///
/// `null` wire values decode as unset. Unknown keys go to the schema's catch-all field if it
/// has one, and are otherwise ignored or rejected according to the [`UnknownFields`] policy.
pub fn decode_with(
    schema: &Arc<Schema>,
    wire: WireDocument,
    options: DecodeOptions,
) -> Result<InstanceState, Error> {
    let policy = options.unknown_fields.unwrap_or(schema.unknown_fields());
    let mut slots = vec![Slot::Absent; schema.len()].into_boxed_slice();
    let mut extras: Option<WireDocument> = None;

    for (key, value) in &wire {
        if key == CLASS_KEY && schema.allows_inheritance() {
            continue;
        }
        match schema.index_of_wire_key(key) {
            Some(idx) if schema.catch_all_index() == Some(idx) => {
                extras
                    .get_or_insert_with(WireDocument::default)
                    .insert(key.clone(), value.clone());
            }
            Some(_) if value.is_null() => {}
            Some(idx) => {
                let field = schema.field_at(idx);
                if !shape_matches(field.kind(), value) {
                    return Err(DecodeError {
                        path: FieldPath::key(field.name()),
                        expected: field.kind().describe(),
                        found: value.wire_type(),
                    }
                    .into());
                }
                slots[idx] = Slot::Stored;
            }
            None if schema.catch_all_index().is_some() => {
                extras
                    .get_or_insert_with(WireDocument::default)
                    .insert(key.clone(), value.clone());
            }
            None => match policy {
                UnknownFields::Ignore => {
                    trace!(document = schema.name(), key = key.as_str(), "ignoring unknown wire key");
                }
                UnknownFields::Reject => return Err(Error::unknown_field(schema.name(), key)),
            },
        }
    }
    if let (Some(idx), Some(extras)) = (schema.catch_all_index(), extras) {
        slots[idx] = Slot::Loaded(Value::Dynamic(WireValue::Document(extras)));
    }

    let mut state = InstanceState::from_baseline(Arc::clone(schema), Arc::new(wire), slots)?;
    if options.materialize == Materialize::Eager {
        state.materialize_all()?;
    }
    Ok(state)
}

/// The top-level check decode performs before trusting a stored value.
fn shape_matches(kind: &FieldKind, value: &WireValue) -> bool {
    matches!(
        (kind, value),
        (FieldKind::String, WireValue::String(_))
            | (FieldKind::Int, WireValue::Int(_))
            | (FieldKind::Float, WireValue::Float(_) | WireValue::Int(_))
            | (FieldKind::Bool, WireValue::Bool(_))
            | (FieldKind::Binary, WireValue::Binary(_))
            | (FieldKind::DateTime, WireValue::DateTime(_))
            | (FieldKind::Id, WireValue::Id(_) | WireValue::String(_))
            | (FieldKind::Embedded(_), WireValue::Document(_))
            | (FieldKind::List(_), WireValue::Array(_))
            | (FieldKind::Map(_), WireValue::Document(_))
            | (
                FieldKind::Reference(_),
                WireValue::Reference(_) | WireValue::Id(_) | WireValue::String(_) | WireValue::Int(_)
            )
            | (FieldKind::Dynamic, _)
    )
}

/// Decodes one stored wire value into the typed value of `kind`.
///
/// Persisted data is trusted: validators do not run, only the structure is checked.
pub(crate) fn decode_value(
    kind: &FieldKind,
    wire: &WireValue,
    at: &FieldPath,
    options: DecodeOptions,
) -> Result<Value, Error> {
    let mismatch = || -> Error {
        DecodeError {
            path: at.clone(),
            expected: kind.describe(),
            found: wire.wire_type(),
        }
        .into()
    };
    Ok(match (kind, wire) {
        (FieldKind::String, WireValue::String(s)) => Value::String(s.clone()),
        (FieldKind::Int, WireValue::Int(i)) => Value::Int(*i),
        (FieldKind::Float, WireValue::Float(f)) => Value::Float(*f),
        #[allow(clippy::cast_precision_loss)]
        (FieldKind::Float, WireValue::Int(i)) => Value::Float(*i as f64),
        (FieldKind::Bool, WireValue::Bool(b)) => Value::Bool(*b),
        (FieldKind::Binary, WireValue::Binary(b)) => Value::Binary(b.clone()),
        (FieldKind::DateTime, WireValue::DateTime(t)) => Value::DateTime(*t),
        (FieldKind::Id, WireValue::Id(u)) => Value::Id(*u),
        (FieldKind::Id, WireValue::String(s)) => {
            Value::Id(Ulid::from_string(s).map_err(|_| mismatch())?)
        }
        (FieldKind::Embedded(schema), WireValue::Document(doc)) => Value::Embedded(Box::new(
            decode_with(schema, doc.clone(), options).map_err(|e| within(e, at))?,
        )),
        (FieldKind::List(inner), WireValue::Array(items)) => Value::List(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| decode_value(inner, item, &at.index(i), options))
                .collect::<Result<_, _>>()?,
        ),
        (FieldKind::Map(inner), WireValue::Document(doc)) => Value::Map(
            doc.iter()
                .map(|(key, item)| {
                    let value = decode_value(inner, item, &at.child(key.as_str()), options)?;
                    Ok((key.clone(), value))
                })
                .collect::<Result<ValueMap, Error>>()?,
        ),
        (FieldKind::Reference(_), WireValue::Reference(token)) => Value::Reference(token.clone()),
        (FieldKind::Reference(target), id @ (WireValue::Id(_) | WireValue::String(_) | WireValue::Int(_))) => {
            Value::Reference(ReferenceToken::new(target.as_str(), id.clone()))
        }
        (FieldKind::Dynamic, wire) => Value::Dynamic(wire.clone()),
        _ => return Err(mismatch()),
    })
}

/// Re-roots path-carrying errors from a nested decode below `at`.
fn within(err: Error, at: &FieldPath) -> Error {
    match err {
        Error::Decode(DecodeError {
            path,
            expected,
            found,
        }) => Error::Decode(DecodeError {
            path: path.prefixed(at),
            expected,
            found,
        }),
        Error::Validation(e) => Error::Validation(e.within(at)),
        Error::MissingField { path } => Error::MissingField {
            path: path.prefixed(at),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schema::{Field, SchemaRegistry},
        timestamp::Timestamp,
        wire_doc,
    };
    use quickcheck::{Arbitrary, Gen};

    fn address() -> Arc<Schema> {
        Schema::embedded("Address")
            .field(Field::string("city").required())
            .field(Field::string("zip").db_field("z"))
            .build()
            .unwrap()
    }

    fn person() -> Arc<Schema> {
        Schema::builder("Person")
            .field(Field::string("name").required())
            .field(Field::int("age"))
            .field(Field::float("height"))
            .field(Field::bool("active"))
            .field(Field::binary("avatar"))
            .field(Field::datetime("born"))
            .field(Field::embedded("address", &address()))
            .field(Field::list("tags", FieldKind::String))
            .field(Field::map("scores", FieldKind::Int))
            .field(Field::reference("employer", "Company"))
            .field(Field::dynamic("extra"))
            .build()
            .unwrap()
    }

    #[test]
    fn flat_document_round_trips() {
        let schema = Schema::builder("Person")
            .field(Field::string("name"))
            .field(Field::int("age"))
            .build()
            .unwrap();
        let mut state = InstanceState::new(Arc::clone(&schema)).unwrap();
        state.set("name", "Ann").unwrap();
        state.set("age", 30).unwrap();

        let wire = encode(&state).unwrap();
        assert_eq!(wire.keys().collect::<Vec<_>>(), ["name", "age"]);
        assert_eq!(WireValue::Document(wire.clone()).to_string(), r#"{"name": "Ann", "age": 30}"#);

        let mut decoded = decode(&schema, wire).unwrap();
        assert_eq!(decoded.get("age").unwrap(), Some(&Value::Int(30)));
        assert_eq!(decoded, state);
    }

    #[test]
    fn missing_required_fields_fail_encoding() {
        let mut state = InstanceState::new(person()).unwrap();
        assert_eq!(
            encode(&state).unwrap_err(),
            Error::MissingField {
                path: FieldPath::key("name")
            }
        );

        state.set("name", "Ann").unwrap();
        state.embedded_mut("address").unwrap();
        assert_eq!(
            encode(&state).unwrap_err(),
            Error::MissingField {
                path: FieldPath::from("address.city")
            }
        );
    }

    #[test]
    fn references_encode_as_tokens() {
        let mut state = InstanceState::new(person()).unwrap();
        state.set("name", "Ann").unwrap();
        let id = Ulid::new();
        state.set("employer", id).unwrap();
        let wire = encode(&state).unwrap();
        assert_eq!(
            wire.get("employer"),
            Some(&WireValue::Reference(ReferenceToken::new("Company", id)))
        );
    }

    #[test]
    fn null_decodes_as_unset() {
        let mut state = decode(&person(), wire_doc! { "name" => "Ann", "age" => WireValue::Null }).unwrap();
        assert_eq!(state.get("age").unwrap(), None);
        assert!(!encode(&state).unwrap().contains_key("age"));
    }

    #[test]
    fn wire_keys_are_used_on_the_wire() {
        let mut state = decode(
            &person(),
            wire_doc! { "name" => "Ann", "address" => wire_doc! { "city" => "Oslo", "z" => "0150" } },
        )
        .unwrap();
        let address = state.embedded_mut("address").unwrap();
        assert_eq!(address.get("zip").unwrap(), Some(&Value::from("0150")));
    }

    #[test]
    fn unknown_keys_are_ignored_or_rejected() {
        let wire = wire_doc! { "name" => "Ann", "nickname" => "Annie" };
        let state = decode(&person(), wire.clone()).unwrap();
        assert!(!encode(&state).unwrap().contains_key("nickname"));

        let strict = DecodeOptions {
            unknown_fields: Some(UnknownFields::Reject),
            ..DecodeOptions::default()
        };
        let err = decode_with(&person(), wire, strict).unwrap_err();
        assert_eq!(err, Error::unknown_field("Person", "nickname"));
    }

    #[test]
    fn unknown_keys_go_to_the_catch_all_field() {
        let schema = Schema::builder("Event")
            .field(Field::string("kind"))
            .field(Field::dynamic("extra").catch_all())
            .build()
            .unwrap();
        let wire = wire_doc! { "kind" => "click", "x" => 10, "y" => 20 };
        let mut state = decode(&schema, wire.clone()).unwrap();
        let extra = state.get("extra").unwrap().and_then(Value::as_dynamic).cloned();
        assert_eq!(extra, Some(WireValue::Document(wire_doc! { "x" => 10, "y" => 20 })));
        assert_eq!(encode(&state).unwrap(), wire);
    }

    #[test]
    fn top_level_shape_is_checked_at_load() {
        let err = decode(&person(), wire_doc! { "name" => "Ann", "age" => "thirty" }).unwrap_err();
        insta::assert_snapshot!(err, @"cannot decode `age`: expected int, found string");
    }

    #[test]
    fn nested_shape_is_checked_on_access() {
        let wire = wire_doc! {
            "name" => "Ann",
            "tags" => WireValue::array([WireValue::from("a"), WireValue::from(1)]),
        };
        let mut state = decode(&person(), wire.clone()).unwrap();
        let err = state.get("tags").unwrap_err();
        insta::assert_snapshot!(err, @"cannot decode `tags.1`: expected string, found int");

        let err = decode_with(&person(), wire, DecodeOptions::eager()).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn lazy_slots_survive_re_encoding_untouched() {
        let wire = wire_doc! {
            "name" => "Ann",
            "address" => wire_doc! { "city" => "Oslo" },
            "scores" => wire_doc! { "math" => 9 },
        };
        let state = decode(&person(), wire.clone()).unwrap();
        assert_eq!(encode(&state).unwrap(), wire);
    }

    #[test]
    fn bare_identities_decode_as_references() {
        let mut state = decode(&person(), wire_doc! { "name" => "Ann", "employer" => 42 }).unwrap();
        assert_eq!(
            state.get("employer").unwrap(),
            Some(&Value::Reference(ReferenceToken::new("Company", 42)))
        );
    }

    #[test]
    fn inheritance_writes_the_class_tag() {
        let base = Schema::builder("Animal")
            .allow_inheritance()
            .field(Field::string("name"))
            .build()
            .unwrap();
        let dog = Schema::builder("Dog")
            .extends(&base)
            .field(Field::bool("good"))
            .build()
            .unwrap();
        let registry = SchemaRegistry::builder()
            .register(&base)
            .register(&dog)
            .build()
            .unwrap();

        let mut rex = InstanceState::new(Arc::clone(&dog)).unwrap();
        rex.set("name", "Rex").unwrap();
        rex.set("good", true).unwrap();
        let wire = encode(&rex).unwrap();
        assert_eq!(wire.get(CLASS_KEY), Some(&WireValue::from("Animal.Dog")));

        assert!(Arc::ptr_eq(registry.concrete_schema(&base, &wire), &dog));
    }

    #[test]
    fn embedded_documents_keep_their_declared_type() {
        let shape = Schema::embedded("Shape")
            .allow_inheritance()
            .field(Field::string("color"))
            .build()
            .unwrap();
        let circle = Schema::embedded("Circle")
            .extends(&shape)
            .field(Field::float("radius"))
            .build()
            .unwrap();
        let drawing = Schema::builder("Drawing")
            .field(Field::embedded("shape", &shape))
            .build()
            .unwrap();

        let mut round = InstanceState::new(circle).unwrap();
        round.set("color", "red").unwrap();
        round.set("radius", 2.0).unwrap();
        let mut state = InstanceState::new(Arc::clone(&drawing)).unwrap();
        let err = state.set("shape", round).unwrap_err();
        insta::assert_snapshot!(err, @"invalid value for `shape`: expected embedded Shape, got embedded Circle");
        assert_eq!(state.peek("shape").unwrap(), None);

        let mut plain = InstanceState::new(shape).unwrap();
        plain.set("color", "red").unwrap();
        state.set("shape", plain).unwrap();
        let wire = encode(&state).unwrap();
        assert_eq!(
            wire.get("shape"),
            Some(&WireValue::from(wire_doc! { "_cls" => "Shape", "color" => "red" }))
        );
        let back = decode(&drawing, wire.clone()).unwrap();
        assert_eq!(back, state);
        assert_eq!(encode(&back).unwrap(), wire);
    }

    #[derive(Clone, Debug)]
    struct PersonWire(WireDocument);

    impl Arbitrary for PersonWire {
        fn arbitrary(g: &mut Gen) -> Self {
            let mut doc = wire_doc! { "name" => String::arbitrary(g) };
            if bool::arbitrary(g) {
                doc.insert("age".into(), i64::arbitrary(g).into());
            }
            if bool::arbitrary(g) {
                let height = f64::arbitrary(g);
                doc.insert("height".into(), height.into());
            }
            if bool::arbitrary(g) {
                doc.insert("avatar".into(), Vec::<u8>::arbitrary(g).into());
            }
            if bool::arbitrary(g) {
                doc.insert("born".into(), Timestamp::arbitrary(g).into());
            }
            if bool::arbitrary(g) {
                doc.insert(
                    "address".into(),
                    wire_doc! { "city" => String::arbitrary(g) }.into(),
                );
            }
            if bool::arbitrary(g) {
                doc.insert("tags".into(), WireValue::array(Vec::<String>::arbitrary(g)));
            }
            if bool::arbitrary(g) {
                let token = ReferenceToken::new("Company", u32::arbitrary(g));
                doc.insert("employer".into(), token.into());
            }
            Self(doc)
        }
    }

    #[quickcheck]
    fn decode_then_encode_is_identity(PersonWire(wire): PersonWire) -> bool {
        let Ok(mut state) = decode_with(&person(), wire.clone(), DecodeOptions::eager()) else {
            return false;
        };
        let lazy = decode(&person(), wire.clone()).ok();
        state.materialize_all().is_ok()
            && encode(&state).ok().as_ref() == Some(&wire)
            && lazy.as_ref() == Some(&state)
    }
}
