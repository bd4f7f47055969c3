// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # docmap: A Typed Object-Document Mapper
//!
//! This crate maps typed, schema-described documents onto the nested, dynamically-typed
//! values a document database stores. It is the engine underneath an ODM: it knows how a
//! document type is shaped, validates what application code writes into it, converts it to and
//! from the store's wire format, and works out the smallest update that brings a stored copy
//! up to date. It does not talk to a database itself; persistence goes through the
//! [`DocumentStore`] trait.
//!
//! The two things this crate optimizes for are loading and saving. Loading a document costs one
//! pass over its top-level keys, because nested values are decoded only when they are first
//! read. Saving a loaded document sends only the fields that changed, addressed by path, rather
//! than the whole document.
//!
//! ## Core Concepts
//!
//! - A [`Schema`](schema::Schema) describes one document type: an ordered list of
//!   [`Field`](schema::Field)s, each with a [`FieldKind`](schema::FieldKind), validators, an
//!   optional default and the key it is stored under. Schemas are built once and shared.
//! - An [`InstanceState`] holds the values of one document together with the set of fields that
//!   changed since it was loaded or saved.
//! - The [`codec`] converts between an [`InstanceState`] and a [`WireDocument`].
//! - The [`changes`] module computes a [`ChangeSet`] from an [`InstanceState`]: a full
//!   replacement for a new document, or a list of `$set`/`$unset`/`$push`/`$pull` operations
//!   for a loaded one.
//! - A [`Document`] ties these together with a per-document cache of resolved references and
//!   the `save`/`reload`/`delete` entry points.
//!
//! ## Dirty Tracking
//!
//! Every successful write marks its field dirty. Writes are validated before they are applied,
//! so a rejected write leaves the document untouched. Embedded documents track their own dirty
//! fields; changing a field of an embedded document in place produces an update of that nested
//! path only:
//!
//! ```
//! # use docmap::{Document, wire_doc, schema::{Field, Schema}};
//! let address = Schema::embedded("Address")
//!     .field(Field::string("city"))
//!     .field(Field::string("street"))
//!     .build()?;
//! let person = Schema::builder("Person")
//!     .field(Field::string("name").required())
//!     .field(Field::embedded("address", &address))
//!     .build()?;
//!
//! let mut ann = Document::from_wire(
//!     &person,
//!     wire_doc! {
//!         "_id" => ulid::Ulid::nil(),
//!         "name" => "Ann",
//!         "address" => wire_doc! { "city" => "Berlin", "street" => "Unter den Linden" },
//!     },
//! )?;
//! ann.embedded_mut("address")?.set("street", "Friedrichstraße")?;
//! assert_eq!(ann.changes()?.to_string(), r#"$set address.street: "Friedrichstraße""#);
//! # Ok::<(), docmap::Error>(())
//! ```
//!
//! Dirty fields are cleared only when the store confirms a write.
//!
//! ## References
//!
//! A reference field stores a [`ReferenceToken`]: the type and identity of another document.
//! Tokens are never resolved while decoding. [`Document::dereference`] fetches the target on
//! first use and caches it for the lifetime of the document; concurrent dereferences of the
//! same token share a single fetch.
//!
//! ## Schema Registry
//!
//! Resolving a reference needs the schema of its target, and loading a polymorphic document
//! needs the schema its class tag names. Both look it up in a [`SchemaRegistry`], which is
//! built once and passed explicitly to whatever needs it.
//!
//! ## License
//!
//! This project is licensed under either of
//!
//! - Apache License, Version 2.0, ([LICENSE-APACHE](LICENSE-APACHE) or http://www.apache.org/licenses/LICENSE-2.0)
//! - MIT license ([LICENSE-MIT](LICENSE-MIT) or http://opensource.org/licenses/MIT)
//!
//! at your option.
//!
//! ## Features
//!
//! - `json`: Enables conversion of wire values to and from `serde_json::Value`, using the
//!   extended JSON spelling for types JSON lacks. This feature is enabled by default.
//! - `serde`: Provides `serde` support for wire values, change-sets and timestamps.
//! - `arbitrary`: Implements `quickcheck::Arbitrary` for wire values, useful for property-based testing.
//! - `chrono`: Enables `chrono` support for `Timestamp`. This feature is enabled by default.
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

pub mod changes;
pub use changes::{Change, ChangeSet, Operation};
pub mod codec;
pub use codec::{DecodeOptions, Materialize};
pub mod document;
pub use document::Document;
pub mod error;
pub use error::{ConfigurationError, DecodeError, Error, Result, StoreError, ValidationError};
#[cfg(feature = "json")]
pub mod json;
pub mod macros;
pub mod path;
pub use path::FieldPath;
pub mod reference;
pub use reference::ReferenceCache;
pub mod schema;
pub use schema::SchemaRegistry;
pub mod state;
pub use state::InstanceState;
pub mod store;
pub use store::{DocumentStore, MemoryStore};
#[cfg(any(test, feature = "arbitrary"))]
pub mod test_util;
pub mod timestamp;
pub use timestamp::Timestamp;
pub mod transaction;
pub use transaction::EditTransaction;
pub mod value;
pub use value::{Value, ValueMap};
pub mod wire;
pub use wire::{ReferenceToken, WireDocument, WireValue};

#[cfg(feature = "chrono")]
pub use chrono;
pub use ulid;
