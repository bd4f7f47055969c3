// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Lazy, cached resolution of references.
//!
//! Each [`Document`] owns a [`ReferenceCache`]. The first resolution of a token fetches the
//! target from the store; later resolutions return the cached [`Document`] without fetching.
//! A missing target is cached as well, so a broken reference is not re-fetched either.
//!
//! Every token gets its own [`OnceCell`]. The cache lock is only held to look up or insert the
//! cell, never across the fetch, so concurrent resolutions of the same token join the fetch
//! in flight while different tokens resolve independently. If the resolving future is dropped
//! before the fetch completes, the cell stays empty and the next resolution fetches again.
use crate::{
    document::Document,
    error::Error,
    schema::{IDENTITY_KEY, SchemaRegistry},
    store::DocumentStore,
    wire::{self, ReferenceToken},
};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::OnceCell;
use tracing::debug;

/// A resolved target; `None` if the store reported it absent.
pub type Resolved = Option<Arc<Document>>;

type Entries = HashMap<ReferenceToken, Arc<OnceCell<Resolved>>, ahash::RandomState>;

/// Per-document cache of resolved references.
#[derive(Default)]
pub struct ReferenceCache {
    entries: Mutex<Entries>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cell(&self, token: &ReferenceToken) -> Arc<OnceCell<Resolved>> {
        Arc::clone(self.lock().entry(token.clone()).or_default())
    }

    /// Resolves `token`, fetching it from `store` only if it was not resolved before.
    ///
    /// Store failures are not cached.
    pub async fn resolve<S: DocumentStore>(
        &self,
        token: &ReferenceToken,
        registry: &SchemaRegistry,
        store: &S,
    ) -> Result<Resolved, Error> {
        let cell = self.cell(token);
        let resolved = cell
            .get_or_try_init(|| fetch(token, registry, store))
            .await?;
        Ok(resolved.clone())
    }

    /// Whether `token` has a completed resolution cached.
    pub fn is_resolved(&self, token: &ReferenceToken) -> bool {
        self.lock().get(token).is_some_and(|cell| cell.initialized())
    }

    /// Drops the cached resolution of `token`. Returns whether there was one.
    pub fn invalidate(&self, token: &ReferenceToken) -> bool {
        let removed = self.lock().remove(token).is_some();
        if removed {
            debug!(%token, "invalidated reference");
        }
        removed
    }

    /// Drops every cached resolution.
    pub fn clear(&self) {
        let mut entries = self.lock();
        if !entries.is_empty() {
            debug!(entries = entries.len(), "cleared reference cache");
        }
        entries.clear();
    }

    /// The number of tokens with a cache entry, resolved or in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ReferenceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.lock();
        f.debug_set()
            .entries(entries.iter().filter(|(_, cell)| cell.initialized()).map(|(token, _)| token))
            .finish()
    }
}

async fn fetch<S: DocumentStore>(
    token: &ReferenceToken,
    registry: &SchemaRegistry,
    store: &S,
) -> Result<Resolved, Error> {
    let schema = registry.get(token.document())?;
    let Some(collection) = schema.collection() else {
        return Err(Error::UnknownDocumentType {
            name: token.document().to_string(),
        });
    };
    let mut filter = wire::document_with_capacity(1);
    filter.insert(IDENTITY_KEY.to_string(), token.id().clone());
    let found = store.find_one(collection, &filter).await?;
    debug!(%token, found = found.is_some(), "resolved reference");
    found
        .map(|wire| registry.decode(schema, wire).map(Arc::new))
        .transpose()
}
