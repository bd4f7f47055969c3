// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! JSON representation
//!
//! Wire values map to JSON the way document databases print them in their "extended JSON"
//! mode. Plain JSON types map to themselves; the types JSON lacks become single-key objects
//! whose key starts with `$`.
//!
//! # Examples
//!
//! ## A document with every extended type
//!
//! ```json
//! {
//!   "_id": { "$oid": "01ARZ3NDEKTSV4RRFFQ69G5FAV" },
//!   "name": "John Doe",
//!   "born": { "$date": 1690000000000 },
//!   "avatar": { "$binary": "iVBORw0KGgo=" },
//!   "employer": { "$ref": "Company", "$id": 7 }
//! }
//! ```
//!
//! Converting JSON back into a wire value reverses the mapping. Objects that merely look like
//! extended types (wrong value type, extra keys) stay plain documents. Integers that do not fit
//! an `i64` become floats.
use crate::{
    timestamp::{Timestamp, TimestampError},
    wire::{ReferenceToken, WireDocument, WireValue},
};
use base64::Engine;
use serde_json::{Map, Value};
use ulid::Ulid;

const BINARY: &str = "$binary";
const DATE: &str = "$date";
const OID: &str = "$oid";
const REF: &str = "$ref";
const REF_ID: &str = "$id";

/// Error returned when JSON cannot be turned into a wire value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JsonError {
    #[error("`{0}` is not valid base64")]
    Binary(String),
    #[error(transparent)]
    Date(#[from] TimestampError),
    #[error("`{0}` is not a valid identifier")]
    Id(String),
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Converts a [`WireValue`] to a [`serde_json::Value`].
///
/// Non-finite floats have no JSON spelling and become `null`.
impl From<WireValue> for Value {
    fn from(val: WireValue) -> Self {
        match val {
            WireValue::Null => Value::Null,
            WireValue::Bool(v) => v.into(),
            WireValue::Int(v) => v.into(),
            WireValue::Float(v) => v.into(),
            WireValue::String(v) => v.into(),
            WireValue::Binary(v) => tagged(
                BINARY,
                base64::engine::general_purpose::STANDARD.encode(v).into(),
            ),
            WireValue::DateTime(v) => tagged(DATE, v.as_millis().into()),
            WireValue::Id(v) => tagged(OID, v.to_string().into()),
            WireValue::Array(items) => Value::Array(items.into_iter().map(Into::into).collect()),
            WireValue::Document(doc) => Value::Object(document_to_json(doc)),
            WireValue::Reference(token) => {
                let mut obj = Map::with_capacity(2);
                obj.insert(REF.to_string(), token.document().into());
                obj.insert(REF_ID.to_string(), token.id().clone().into());
                Value::Object(obj)
            }
        }
    }
}

fn tagged(tag: &str, value: Value) -> Value {
    let mut obj = Map::with_capacity(1);
    obj.insert(tag.to_string(), value);
    Value::Object(obj)
}

fn document_to_json(doc: WireDocument) -> Map<String, Value> {
    doc.into_iter().map(|(k, v)| (k, v.into())).collect()
}

/// Converts a [`serde_json::Value`] back into a [`WireValue`].
impl TryFrom<Value> for WireValue {
    type Error = JsonError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => WireValue::Null,
            Value::Bool(b) => WireValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => WireValue::Int(i),
                None => WireValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => WireValue::String(s),
            Value::Array(items) => WireValue::Array(
                items
                    .into_iter()
                    .map(WireValue::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(obj) => object_from_json(obj)?,
        })
    }
}

fn object_from_json(obj: Map<String, Value>) -> Result<WireValue, JsonError> {
    if obj.len() == 1 {
        match obj.iter().next() {
            Some((key, Value::String(encoded))) if key == BINARY => {
                return base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map(WireValue::Binary)
                    .map_err(|_| JsonError::Binary(encoded.clone()));
            }
            Some((key, Value::Number(millis))) if key == DATE && millis.is_i64() => {
                let millis = millis.as_i64().unwrap_or_default();
                return Ok(WireValue::DateTime(Timestamp::from_millis(millis)?));
            }
            Some((key, Value::String(date))) if key == DATE => {
                return Ok(WireValue::DateTime(parse_date(date)?));
            }
            Some((key, Value::String(id))) if key == OID => {
                return Ulid::from_string(id)
                    .map(WireValue::Id)
                    .map_err(|_| JsonError::Id(id.clone()));
            }
            _ => {}
        }
    }
    if obj.len() == 2 {
        if let (Some(Value::String(document)), Some(id)) = (obj.get(REF), obj.get(REF_ID)) {
            let id = WireValue::try_from(id.clone())?;
            return Ok(WireValue::Reference(ReferenceToken::new(document.as_str(), id)));
        }
    }
    Ok(WireValue::Document(document_from_json(obj)?))
}

#[cfg(feature = "chrono")]
fn parse_date(date: &str) -> Result<Timestamp, JsonError> {
    Ok(date.parse::<Timestamp>()?)
}

#[cfg(not(feature = "chrono"))]
fn parse_date(date: &str) -> Result<Timestamp, JsonError> {
    Err(TimestampError::Parse(date.to_string()).into())
}

fn document_from_json(obj: Map<String, Value>) -> Result<WireDocument, JsonError> {
    let mut doc = crate::wire::document_with_capacity(obj.len());
    for (key, value) in obj {
        doc.insert(key, WireValue::try_from(value)?);
    }
    Ok(doc)
}

/// Converts a whole [`WireDocument`] to a JSON object.
pub fn to_json(doc: WireDocument) -> Value {
    Value::Object(document_to_json(doc))
}

/// Parses a JSON object into a [`WireDocument`].
pub fn from_json(value: Value) -> Result<WireDocument, JsonError> {
    match value {
        Value::Object(obj) => document_from_json(obj),
        other => Err(JsonError::NotAnObject(json_type_name(&other))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
