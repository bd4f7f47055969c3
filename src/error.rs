// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Error types.
//!
//! Every error names the offending field or path so that a failure deep inside a nested
//! document can be traced back without a debugger.
use crate::{
    path::FieldPath,
    wire::{ReferenceToken, WireType, WireValue},
};
use std::borrow::Cow;
use thiserror::Error as ThisError;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A schema could not be built. These are programming errors in the schema declaration and
/// are expected to surface once, at type-definition time.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ConfigurationError {
    #[error("document `{document}` declares field `{name}` more than once")]
    DuplicateField { document: String, name: String },
    #[error("document `{document}` maps more than one field to wire key `{key}`")]
    DuplicateWireKey { document: String, key: String },
    #[error("document `{document}` declares more than one identity field (`{first}`, `{second}`)")]
    MultipleIdentityFields {
        document: String,
        first: String,
        second: String,
    },
    #[error("document `{document}` declares more than one catch-all dynamic field")]
    MultipleCatchAllFields { document: String },
    #[error("embedded document `{document}` cannot declare identity field `{name}`")]
    IdentityOnEmbedded { document: String, name: String },
    #[error("default for field `{name}` of `{document}` is invalid: {reason}")]
    InvalidDefault {
        document: String,
        name: String,
        reason: String,
    },
    #[error("field `{name}` of `{document}` uses a field option its kind does not support: {reason}")]
    InvalidOption {
        document: String,
        name: String,
        reason: String,
    },
    #[error("document type `{0}` is registered more than once")]
    DuplicateDocumentType(String),
    #[error("document `{document}` field `{field}` references unregistered type `{target}`")]
    UnknownReferenceTarget {
        document: String,
        field: String,
        target: String,
    },
    #[error("document `{document}` extends `{parent}`, which does not allow inheritance")]
    InheritanceNotAllowed { document: String, parent: String },
}

/// A value was rejected by a field's coercion or validators.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("invalid value for `{path}`: {message}")]
pub struct ValidationError {
    pub path: FieldPath,
    pub message: Cow<'static, str>,
}

impl ValidationError {
    pub fn new(path: FieldPath, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }

    /// Re-roots the error below `prefix`, used when a nested value fails.
    #[must_use]
    pub fn within(self, prefix: &FieldPath) -> Self {
        Self {
            path: self.path.prefixed(prefix),
            message: self.message,
        }
    }
}

/// A stored wire value does not have the shape its field declares.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("cannot decode `{path}`: expected {expected}, found {found}")]
pub struct DecodeError {
    pub path: FieldPath,
    pub expected: Cow<'static, str>,
    pub found: WireType,
}

/// Failure reported by the external document store.
///
/// The engine surfaces these unchanged; it never retries.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum StoreError {
    #[error("connectivity failure: {0}")]
    Connectivity(String),
    #[error("write conflict in `{collection}`: {reason}")]
    Conflict { collection: String, reason: String },
    #[error("no document with identity {id} in `{collection}`")]
    NotFound { collection: String, id: WireValue },
}

/// Any error this crate can produce.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("required field `{path}` is missing")]
    MissingField { path: FieldPath },
    #[error("document `{document}` has no field `{name}`")]
    UnknownField { document: String, name: String },
    #[error("reference `{path}` points at missing document {reference}")]
    BrokenReference {
        path: FieldPath,
        reference: ReferenceToken,
    },
    #[error("no document type named `{name}` is registered")]
    UnknownDocumentType { name: String },
    #[error("document `{document}` has no identity yet")]
    MissingIdentity { document: String },
    #[error("embedded document `{document}` cannot be persisted on its own")]
    NotPersistable { document: String },
    #[error("field `{name}` of `{document}` cannot be edited before the document is loaded")]
    NotLoaded { document: String, name: String },
    #[error("document `{document}` with identity {id} no longer exists")]
    DocumentMissing { document: String, id: WireValue },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub(crate) fn unknown_field(document: &str, name: &str) -> Self {
        Error::UnknownField {
            document: document.to_string(),
            name: name.to_string(),
        }
    }

    /// Whether this error came from the document store.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}
