// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The set of known document types.
//!
//! A [`SchemaRegistry`] maps class names to schemas. It is built once, checked for consistency
//! (every reference field must point at a registered type), and read-only afterwards. It is
//! passed explicitly to whatever needs to find a schema by name: reference resolution and
//! polymorphic decoding. A process-wide instance can be installed with
//! [`SchemaRegistry::install_global`] for applications that prefer one.
use super::{CLASS_KEY, FieldKind, Schema};
use crate::{
    codec::{self, DecodeOptions},
    document::Document,
    error::{ConfigurationError, Error},
    wire::{WireDocument, WireValue},
};
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

static GLOBAL: OnceLock<SchemaRegistry> = OnceLock::new();

/// Read-only lookup of schemas by class name.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<Schema>, ahash::RandomState>,
}

impl SchemaRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Installs `self` as the process-wide registry.
    ///
    /// Only the first installation succeeds; later ones get their registry back.
    pub fn install_global(self) -> Result<&'static SchemaRegistry, SchemaRegistry> {
        GLOBAL.set(self)?;
        GLOBAL.get().ok_or_else(SchemaRegistry::default)
    }

    /// The process-wide registry, if one was installed.
    pub fn global() -> Option<&'static SchemaRegistry> {
        GLOBAL.get()
    }

    /// Looks up a schema by class name.
    pub fn get(&self, class_name: &str) -> Result<&Arc<Schema>, Error> {
        self.schemas
            .get(class_name)
            .ok_or_else(|| Error::UnknownDocumentType {
                name: class_name.to_string(),
            })
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.schemas.contains_key(class_name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemas.values()
    }

    /// The schema a stored document should be decoded with when it is loaded as a `base`.
    ///
    /// That is the schema named by the document's class tag, provided it is registered and
    /// derives from `base`; otherwise `base` itself.
    pub fn concrete_schema<'a>(&'a self, base: &'a Arc<Schema>, wire: &WireDocument) -> &'a Arc<Schema> {
        if !base.allows_inheritance() {
            return base;
        }
        match wire.get(CLASS_KEY) {
            Some(WireValue::String(class_name)) => self
                .schemas
                .get(class_name)
                .filter(|schema| schema.is_a(base))
                .unwrap_or(base),
            _ => base,
        }
    }

    /// Decodes `wire` as a `base`, picking the concrete subclass from its class tag.
    pub fn decode(&self, base: &Arc<Schema>, wire: WireDocument) -> Result<Document, Error> {
        let schema = self.concrete_schema(base, &wire);
        let state = codec::decode_with(schema, wire, DecodeOptions::default())?;
        Ok(Document::from_state(state))
    }
}

/// Collects schemas for a [`SchemaRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    schemas: Vec<Arc<Schema>>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn register(mut self, schema: &Arc<Schema>) -> Self {
        self.schemas.push(Arc::clone(schema));
        self
    }

    /// Checks that class names are unique and that every reference points at a registered
    /// type.
    pub fn build(self) -> Result<SchemaRegistry, ConfigurationError> {
        let mut schemas =
            HashMap::with_capacity_and_hasher(self.schemas.len(), ahash::RandomState::default());
        for schema in self.schemas {
            let class_name = schema.class_name().to_string();
            if schemas.insert(class_name.clone(), schema).is_some() {
                return Err(ConfigurationError::DuplicateDocumentType(class_name));
            }
        }
        let registry = SchemaRegistry { schemas };
        for schema in registry.schemas.values() {
            check_references(&registry, schema)?;
        }
        Ok(registry)
    }
}

fn check_references(registry: &SchemaRegistry, schema: &Schema) -> Result<(), ConfigurationError> {
    fn check_kind(
        registry: &SchemaRegistry,
        schema: &Schema,
        field: &str,
        kind: &FieldKind,
    ) -> Result<(), ConfigurationError> {
        match kind {
            FieldKind::Reference(target) if !registry.contains(target) => {
                Err(ConfigurationError::UnknownReferenceTarget {
                    document: schema.class_name().to_string(),
                    field: field.to_string(),
                    target: target.clone(),
                })
            }
            FieldKind::List(inner) | FieldKind::Map(inner) => {
                check_kind(registry, schema, field, inner)
            }
            FieldKind::Embedded(embedded) => check_references(registry, embedded),
            _ => Ok(()),
        }
    }

    for field in schema.fields() {
        check_kind(registry, schema, field.name(), field.kind())?;
    }
    Ok(())
}
