// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The document façade.
//!
//! A [`Document`] is one typed instance of a [`Schema`]. It owns an [`InstanceState`] for its
//! field values and a [`ReferenceCache`] for the documents its reference fields point at, and
//! is the entry point for persistence: [`save`](Document::save), [`reload`](Document::reload)
//! and [`delete`](Document::delete) hand work to a [`DocumentStore`].
//!
//! # Persistence and cancellation
//!
//! Every persistence call computes what it needs from the state first, awaits the store, and
//! only mutates the document once the store reported success. Dropping the future of a
//! persistence call at any point therefore leaves the document as it was.
//!
//! # Example
//!
//! ```
//! # use docmap::{Document, MemoryStore, schema::{Field, Schema}};
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let person = Schema::builder("Person")
//!     .field(Field::string("name").required())
//!     .field(Field::int("age"))
//!     .build()?;
//! let store = MemoryStore::new();
//!
//! let mut ann = Document::with_values(&person, [("name", "Ann")])?;
//! ann.set("age", 30)?;
//! ann.save(&store).await?;
//! assert!(!ann.is_dirty());
//!
//! ann.set("age", 31)?;
//! assert_eq!(ann.changes()?.to_string(), "$set age: 31");
//! ann.save(&store).await?;
//! # Ok::<(), docmap::Error>(())
//! # }).unwrap();
//! ```
use crate::{
    changes::ChangeSet,
    codec::{self, DecodeOptions},
    error::Error,
    path::FieldPath,
    reference::ReferenceCache,
    schema::{FieldKind, IDENTITY_KEY, Schema, SchemaRegistry},
    state::InstanceState,
    store::DocumentStore,
    transaction::EditTransaction,
    value::{Value, ValueMap},
    wire::{self, ReferenceToken, WireDocument, WireValue},
};
use std::{fmt, sync::Arc};
use tracing::debug;

/// One typed document.
pub struct Document {
    state: InstanceState,
    references: ReferenceCache,
    loaded: bool,
}

impl Document {
    /// A new, never persisted document with every default populated.
    pub fn new(schema: &Arc<Schema>) -> Result<Self, Error> {
        Ok(Self::from_state(InstanceState::new(Arc::clone(schema))?))
    }

    /// A new document with the given field values, each validated as if it was set.
    ///
    /// Fails on the first unknown field or invalid value.
    pub fn with_values<K, V>(
        schema: &Arc<Schema>,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, Error>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut document = Self::new(schema)?;
        for (name, value) in values {
            document.state.set(name.as_ref(), value)?;
        }
        Ok(document)
    }

    /// Decodes a stored document. Fields are decoded lazily, on first access.
    pub fn from_wire(schema: &Arc<Schema>, wire: WireDocument) -> Result<Self, Error> {
        Self::from_wire_with(schema, wire, DecodeOptions::default())
    }

    pub fn from_wire_with(
        schema: &Arc<Schema>,
        wire: WireDocument,
        options: DecodeOptions,
    ) -> Result<Self, Error> {
        Ok(Self::from_state(codec::decode_with(schema, wire, options)?))
    }

    /// Wraps an existing state.
    pub fn from_state(state: InstanceState) -> Self {
        Self {
            state,
            references: ReferenceCache::new(),
            loaded: true,
        }
    }

    /// A document known only by its identity, as found at the end of a reference.
    ///
    /// Its content is fetched by [`ensure_loaded`](Self::ensure_loaded). Until then every field
    /// but the identity reads as unset without filling in defaults, and fields set on the stub
    /// are saved as a partial update. Edits that start from the current value of an unfetched
    /// field (`push`, `update`, `embedded_mut`) fail with [`Error::NotLoaded`].
    pub fn lazy(schema: &Arc<Schema>, id: impl Into<WireValue>) -> Result<Self, Error> {
        Ok(Self {
            state: InstanceState::stub(Arc::clone(schema), id.into())?,
            references: ReferenceCache::new(),
            loaded: false,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.state.schema()
    }

    pub fn state(&self) -> &InstanceState {
        &self.state
    }

    pub fn into_state(self) -> InstanceState {
        self.state
    }

    /// Whether this document was never persisted (or was deleted since).
    pub fn is_new(&self) -> bool {
        self.state.is_new()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    /// Whether the content of this document was fetched. Only [`lazy`](Self::lazy) documents
    /// start out unloaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// The wire paths changed since the document was loaded or last saved.
    pub fn changed_paths(&self) -> Vec<FieldPath> {
        self.state.changed_paths()
    }

    /// The identity, once assigned.
    pub fn id(&self) -> Option<WireValue> {
        self.state.identity()
    }

    /// Reads a field, creating its default if it is unset. See [`InstanceState::get`].
    pub fn get(&mut self, name: &str) -> Result<Option<&Value>, Error> {
        self.state.get(name)
    }

    /// Reads a field through a shared borrow. See [`InstanceState::peek`].
    pub fn peek(&self, name: &str) -> Result<Option<Value>, Error> {
        self.state.peek(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        self.state.set(name, value)
    }

    pub fn unset(&mut self, name: &str) -> Result<(), Error> {
        self.state.unset(name)
    }

    pub fn push(&mut self, name: &str, item: impl Into<Value>) -> Result<(), Error> {
        self.state.push(name, item)
    }

    pub fn update(&mut self, name: &str, edit: impl FnOnce(&mut Value)) -> Result<(), Error> {
        self.state.update(name, edit)
    }

    pub fn embedded_mut(&mut self, name: &str) -> Result<&mut InstanceState, Error> {
        self.state.embedded_mut(name)
    }

    /// The token stored in a reference field, without resolving it.
    pub fn reference(&self, name: &str) -> Result<Option<ReferenceToken>, Error> {
        self.state.reference(name)
    }

    /// Resolves the reference stored in field `name`.
    ///
    /// The first call for a given token fetches the target from `store`; later calls, and
    /// concurrent calls while that fetch is in flight, share its result. Returns `Ok(None)` if
    /// the field is unset, or if the target is gone and the field is optional. A missing
    /// target of a required field is a [`Error::BrokenReference`].
    pub async fn dereference<S: DocumentStore>(
        &self,
        name: &str,
        registry: &SchemaRegistry,
        store: &S,
    ) -> Result<Option<Arc<Document>>, Error> {
        let Some(token) = self.state.reference(name)? else {
            return Ok(None);
        };
        let resolved = self.references.resolve(&token, registry, store).await?;
        if resolved.is_none() && self.schema().resolve(name)?.is_required() {
            return Err(Error::BrokenReference {
                path: FieldPath::key(name),
                reference: token,
            });
        }
        Ok(resolved)
    }

    /// Resolves every element of a list-of-references field, in order.
    ///
    /// A missing target is a [`Error::BrokenReference`] naming the element's index.
    pub async fn dereference_all<S: DocumentStore>(
        &self,
        name: &str,
        registry: &SchemaRegistry,
        store: &S,
    ) -> Result<Vec<Arc<Document>>, Error> {
        let field = self.schema().resolve(name)?;
        let FieldKind::List(inner) = field.kind() else {
            return Err(not_a_reference_list(name, field.kind()));
        };
        if !matches!(**inner, FieldKind::Reference(_)) {
            return Err(not_a_reference_list(name, field.kind()));
        }
        let Some(Value::List(items)) = self.state.peek(name)? else {
            return Ok(Vec::new());
        };

        let path = FieldPath::key(name);
        let mut resolved = Vec::with_capacity(items.len());
        for (idx, item) in items.into_iter().enumerate() {
            let Value::Reference(token) = item else {
                unreachable!("a validated list of references only holds references");
            };
            match self.references.resolve(&token, registry, store).await? {
                Some(target) => resolved.push(target),
                None => {
                    return Err(Error::BrokenReference {
                        path: path.index(idx),
                        reference: token,
                    });
                }
            }
        }
        Ok(resolved)
    }

    /// Drops the cached resolution of `token`, so the next dereference fetches it again.
    pub fn invalidate_reference(&self, token: &ReferenceToken) -> bool {
        self.references.invalidate(token)
    }

    /// The cache of resolved references.
    pub fn references(&self) -> &ReferenceCache {
        &self.references
    }

    /// Encodes the whole document. Fails if a required field is unset.
    pub fn to_wire(&self) -> Result<WireDocument, Error> {
        codec::encode(&self.state)
    }

    /// Every field that has a value, keyed by attribute name, in schema order.
    pub fn to_map(&self) -> Result<ValueMap, Error> {
        let schema = Arc::clone(self.schema());
        let mut map = ValueMap::with_capacity_and_hasher(schema.len(), Default::default());
        for field in schema.fields() {
            if let Some(value) = self.state.peek(field.name())? {
                map.insert(field.name().to_string(), value);
            }
        }
        Ok(map)
    }

    /// What the next [`save`](Self::save) would write.
    pub fn changes(&self) -> Result<ChangeSet, Error> {
        self.state.snapshot_dirty()
    }

    /// Starts a batch of edits that is applied only when committed.
    pub fn transact(&mut self) -> EditTransaction<'_> {
        EditTransaction::new(&mut self.state)
    }

    fn collection(&self) -> Result<&str, Error> {
        self.schema()
            .collection()
            .ok_or_else(|| Error::NotPersistable {
                document: self.schema().class_name().to_string(),
            })
    }

    fn require_identity(&self) -> Result<WireValue, Error> {
        self.id().ok_or_else(|| Error::MissingIdentity {
            document: self.schema().class_name().to_string(),
        })
    }

    /// Writes the document to `store`.
    ///
    /// A new document is inserted whole and receives the identity the store reports. A loaded
    /// document sends only what changed; a document without changes sends nothing. The dirty
    /// set is cleared only after the store confirmed the write.
    pub async fn save<S: DocumentStore>(&mut self, store: &S) -> Result<(), Error> {
        let collection = self.collection()?.to_string();
        match self.state.snapshot_dirty()? {
            ChangeSet::Replace(mut doc) if self.state.is_new() => {
                // stores only generate identifiers, other identity kinds must be set up front
                let generated = self
                    .schema()
                    .identity_field()
                    .is_some_and(|field| field.kind() == &FieldKind::Id);
                if self.id().is_none() && !generated {
                    return Err(Error::MissingIdentity {
                        document: self.schema().class_name().to_string(),
                    });
                }
                let id = store.insert(&collection, doc.clone()).await?;
                debug!(document = self.schema().class_name(), %id, "inserted");
                if !doc.contains_key(IDENTITY_KEY) {
                    doc.shift_insert(0, IDENTITY_KEY.to_string(), id.clone());
                }
                self.state.assign_identity(&id)?;
                self.state.mark_clean(doc);
            }
            ChangeSet::Replace(doc) => {
                let id = self.require_identity()?;
                store.replace(&collection, &id, doc.clone()).await?;
                debug!(document = self.schema().class_name(), %id, "replaced");
                self.state.mark_clean(doc);
            }
            ChangeSet::Update(changes) if changes.is_empty() => {
                debug!(document = self.schema().class_name(), "nothing to save");
            }
            ChangeSet::Update(changes) => {
                let id = self.require_identity()?;
                store.update(&collection, &id, &changes).await?;
                debug!(
                    document = self.schema().class_name(),
                    %id,
                    changes = changes.len(),
                    "updated"
                );
                let mut persisted = self.state.baseline().cloned().unwrap_or_default();
                ChangeSet::Update(changes).apply_to(&mut persisted);
                self.state.mark_clean(persisted);
            }
        }
        Ok(())
    }

    /// Replaces the content with what `store` holds for this document's identity.
    ///
    /// Unsaved changes are discarded and every cached reference is dropped.
    pub async fn reload<S: DocumentStore>(&mut self, store: &S) -> Result<(), Error> {
        let collection = self.collection()?;
        let id = self.require_identity()?;
        let mut filter = wire::document_with_capacity(1);
        filter.insert(IDENTITY_KEY.to_string(), id.clone());
        let Some(wire) = store.find_one(collection, &filter).await? else {
            return Err(Error::DocumentMissing {
                document: self.schema().class_name().to_string(),
                id,
            });
        };
        let state = codec::decode(self.schema(), wire)?;
        debug!(document = self.schema().class_name(), %id, "reloaded");
        self.state = state;
        self.references.clear();
        self.loaded = true;
        Ok(())
    }

    /// Fetches the content of a [`lazy`](Self::lazy) document. Does nothing if it is loaded.
    pub async fn ensure_loaded<S: DocumentStore>(&mut self, store: &S) -> Result<(), Error> {
        if self.loaded {
            return Ok(());
        }
        self.reload(store).await
    }

    /// Removes the document from `store`.
    ///
    /// The document keeps its values and identity; saving it again inserts it anew.
    pub async fn delete<S: DocumentStore>(&mut self, store: &S) -> Result<(), Error> {
        let collection = self.collection()?;
        let id = self.require_identity()?;
        store.delete(collection, &id).await?;
        debug!(document = self.schema().class_name(), %id, "deleted");
        self.state.mark_new();
        Ok(())
    }

    /// Loads the first document of `schema`'s collection matching `filter`.
    ///
    /// The filter compares top-level wire keys for equality.
    pub async fn find_one<S: DocumentStore>(
        schema: &Arc<Schema>,
        store: &S,
        filter: &WireDocument,
    ) -> Result<Option<Document>, Error> {
        let collection = schema.collection().ok_or_else(|| Error::NotPersistable {
            document: schema.class_name().to_string(),
        })?;
        store
            .find_one(collection, filter)
            .await?
            .map(|wire| Document::from_wire(schema, wire))
            .transpose()
    }

    /// Like [`find_one`](Self::find_one), but decodes the match with the subclass its class tag
    /// names.
    pub async fn find_one_polymorphic<S: DocumentStore>(
        registry: &SchemaRegistry,
        base: &Arc<Schema>,
        store: &S,
        filter: &WireDocument,
    ) -> Result<Option<Document>, Error> {
        let collection = base.collection().ok_or_else(|| Error::NotPersistable {
            document: base.class_name().to_string(),
        })?;
        store
            .find_one(collection, filter)
            .await?
            .map(|wire| registry.decode(base, wire))
            .transpose()
    }
}

fn not_a_reference_list(name: &str, kind: &FieldKind) -> Error {
    crate::error::ValidationError::new(
        FieldPath::key(name),
        format!("field of kind {kind:?} is not a list of references"),
    )
    .into()
}

impl Clone for Document {
    /// Clones the values. The clone starts with an empty reference cache.
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            references: ReferenceCache::new(),
            loaded: self.loaded,
        }
    }
}

impl PartialEq for Document {
    /// Persisted documents are equal when they have the same type and identity. Documents
    /// without an identity are equal when their content is.
    fn eq(&self, other: &Self) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => self.schema().class_name() == other.schema().class_name() && a == b,
            (None, None) => self.state == other.state,
            _ => false,
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("state", &self.state)
            .field("references", &self.references)
            .field("loaded", &self.loaded)
            .finish()
    }
}
