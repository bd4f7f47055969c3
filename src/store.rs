// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The boundary to the external document store.
//!
//! [`DocumentStore`] is the only way this crate talks to a database. Implementations own the
//! transport, connection handling and retry policy; errors they report are surfaced to the
//! caller unchanged.
//!
//! [`MemoryStore`] keeps collections in process memory. It implements the same update semantics
//! as [`ChangeSet::apply_to`](crate::changes::ChangeSet::apply_to) and is what the tests and
//! benchmarks run against.
use crate::{
    changes::{Change, ChangeSet},
    error::StoreError,
    schema::IDENTITY_KEY,
    wire::{WireDocument, WireValue},
};
use indexmap::IndexMap;
use std::{
    collections::HashMap,
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::debug;
use ulid::Ulid;

/// A document database that stores nested wire documents and returns them unchanged.
///
/// Identities are the values stored under [`IDENTITY_KEY`].
pub trait DocumentStore: Send + Sync {
    /// Inserts `doc` and returns its identity, generating one if `doc` has none.
    ///
    /// Fails with [`StoreError::Conflict`] if the identity already exists.
    fn insert(
        &self,
        collection: &str,
        doc: WireDocument,
    ) -> impl Future<Output = Result<WireValue, StoreError>> + Send;

    /// Replaces the document with identity `id` by `doc`.
    fn replace(
        &self,
        collection: &str,
        id: &WireValue,
        doc: WireDocument,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Applies `changes` to the document with identity `id`.
    fn update(
        &self,
        collection: &str,
        id: &WireValue,
        changes: &[Change],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the first document whose top-level keys equal every entry of `filter`.
    fn find_one(
        &self,
        collection: &str,
        filter: &WireDocument,
    ) -> impl Future<Output = Result<Option<WireDocument>, StoreError>> + Send;

    /// Deletes the document with identity `id`. Deleting a missing document is not an error.
    fn delete(
        &self,
        collection: &str,
        id: &WireValue,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

type Collection = IndexMap<WireValue, WireDocument, ahash::RandomState>;

/// An in-process [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection, ahash::RandomState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Collection, ahash::RandomState>> {
        // a panic while holding the lock cannot leave a collection half-written
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The stored document with identity `id`, if any.
    pub fn get(&self, collection: &str, id: &WireValue) -> Option<WireDocument> {
        self.lock().get(collection)?.get(id).cloned()
    }

    /// The number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.lock().get(collection).map_or(0, Collection::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, mut doc: WireDocument) -> Result<WireValue, StoreError> {
        let id = match doc.get(IDENTITY_KEY) {
            Some(id) if !id.is_null() => id.clone(),
            _ => {
                let id = WireValue::Id(Ulid::new());
                doc.shift_insert(0, IDENTITY_KEY.to_string(), id.clone());
                id
            }
        };
        let mut collections = self.lock();
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.contains_key(&id) {
            return Err(StoreError::Conflict {
                collection: collection.to_string(),
                reason: format!("identity {id} already exists"),
            });
        }
        debug!(collection, %id, "insert");
        documents.insert(id.clone(), doc);
        Ok(id)
    }

    async fn replace(&self, collection: &str, id: &WireValue, mut doc: WireDocument) -> Result<(), StoreError> {
        let mut collections = self.lock();
        let stored = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.clone(),
            })?;
        if !doc.contains_key(IDENTITY_KEY) {
            doc.shift_insert(0, IDENTITY_KEY.to_string(), id.clone());
        }
        debug!(collection, %id, "replace");
        *stored = doc;
        Ok(())
    }

    async fn update(&self, collection: &str, id: &WireValue, changes: &[Change]) -> Result<(), StoreError> {
        let mut collections = self.lock();
        let stored = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.clone(),
            })?;
        debug!(collection, %id, changes = changes.len(), "update");
        ChangeSet::Update(changes.to_vec()).apply_to(stored);
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: &WireDocument) -> Result<Option<WireDocument>, StoreError> {
        let collections = self.lock();
        let found = collections.get(collection).and_then(|documents| {
            documents
                .values()
                .find(|doc| filter.iter().all(|(key, value)| doc.get(key) == Some(value)))
                .cloned()
        });
        debug!(collection, filter = filter.len(), found = found.is_some(), "find_one");
        Ok(found)
    }

    async fn delete(&self, collection: &str, id: &WireValue) -> Result<(), StoreError> {
        let mut collections = self.lock();
        let removed = collections
            .get_mut(collection)
            .and_then(|documents| documents.shift_remove(id));
        debug!(collection, %id, removed = removed.is_some(), "delete");
        Ok(())
    }
}
