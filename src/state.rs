// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Per-instance field storage with dirty tracking.
//!
//! An [`InstanceState`] holds one slot per schema field. A slot is either absent, loaded (a
//! typed [`Value`]), or *stored*: present in the baseline wire document the state was decoded
//! from but not decoded yet. Stored slots are decoded on first access and memoized, which is
//! what makes loading a large document cost one pass over its top-level keys.
//!
//! Every successful write marks the field dirty. Dirtiness of an embedded document that was
//! mutated in place is not recorded in the parent; it is tracked by the nested state and
//! collected recursively by [`changes::compute`](crate::changes::compute).
//!
//! A state is a single-owner value. It performs no synchronization and is not meant to be
//! mutated from several tasks at once.
use crate::{
    changes::{self, ChangeSet},
    codec::{self, DecodeOptions},
    error::{Error, ValidationError},
    path::FieldPath,
    schema::{Field, FieldKind, Schema},
    value::Value,
    wire::{ReferenceToken, WireDocument, WireValue},
};
use smallvec::SmallVec;
use std::{fmt, sync::Arc};
use tracing::trace;

/// The contents of one field slot.
#[derive(Clone, Debug)]
pub(crate) enum Slot {
    Absent,
    /// Present in the baseline under the field's wire key, not decoded yet.
    Stored,
    Loaded(Value),
}

/// Bitset of field indexes, one bit per schema field.
#[derive(Clone, Default, PartialEq, Eq)]
pub(crate) struct DirtySet(SmallVec<[u64; 1]>);

impl DirtySet {
    pub(crate) fn insert(&mut self, idx: usize) {
        let (word, bit) = (idx / 64, idx % 64);
        if self.0.len() <= word {
            self.0.resize(word + 1, 0);
        }
        self.0[word] |= 1 << bit;
    }

    pub(crate) fn contains(&self, idx: usize) -> bool {
        let (word, bit) = (idx / 64, idx % 64);
        self.0.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    pub(crate) fn clear(&mut self) {
        self.0.clear();
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(word, bits)| {
            (0..64)
                .filter(move |bit| bits & (1 << bit) != 0)
                .map(move |bit| word * 64 + bit)
        })
    }
}

/// The field values of one document instance, plus what changed since it was last persisted.
#[derive(Clone)]
pub struct InstanceState {
    schema: Arc<Schema>,
    baseline: Option<Arc<WireDocument>>,
    slots: Box<[Slot]>,
    dirty: DirtySet,
    is_new: bool,
    /// Set for stubs, whose baseline holds nothing but the identity. An absent slot then means
    /// "not fetched", not "not stored".
    partial: bool,
}

impl InstanceState {
    /// Creates a fresh, never persisted state. Fields with defaults are populated immediately.
    pub fn new(schema: Arc<Schema>) -> Result<Self, Error> {
        let mut slots = vec![Slot::Absent; schema.len()].into_boxed_slice();
        let mut dirty = DirtySet::default();
        for (idx, field) in schema.fields().iter().enumerate() {
            if let Some(default) = field.default_value()? {
                slots[idx] = Slot::Loaded(default);
                dirty.insert(idx);
            }
        }
        Ok(Self {
            schema,
            baseline: None,
            slots,
            dirty,
            is_new: true,
            partial: false,
        })
    }

    /// Assembles a state decoded from `baseline`. Used by the codec.
    ///
    /// Fields that the baseline lacks but that have a default are populated and marked dirty,
    /// so that the next update writes them and stays in step with a full encode.
    pub(crate) fn from_baseline(
        schema: Arc<Schema>,
        baseline: Arc<WireDocument>,
        slots: Box<[Slot]>,
    ) -> Result<Self, Error> {
        let mut state = Self {
            schema,
            baseline: Some(baseline),
            slots,
            dirty: DirtySet::default(),
            is_new: false,
            partial: false,
        };
        for idx in 0..state.slots.len() {
            if matches!(state.slots[idx], Slot::Absent) {
                let field = state.schema.field_at(idx);
                if let Some(default) = field.default_value()? {
                    state.slots[idx] = Slot::Loaded(default);
                    state.dirty.insert(idx);
                }
            }
        }
        Ok(state)
    }

    /// A persisted state known only by its identity. Nothing is dirty, every other field reads
    /// as unset, and only whole-value writes are accepted until the real content is decoded.
    pub(crate) fn stub(schema: Arc<Schema>, id: WireValue) -> Result<Self, Error> {
        let Some(idx) = schema.identity_index() else {
            return Err(Error::NotPersistable {
                document: schema.class_name().to_string(),
            });
        };
        let mut baseline = crate::wire::document_with_capacity(1);
        baseline.insert(schema.field_at(idx).wire_key().to_string(), id);
        let mut slots = vec![Slot::Absent; schema.len()].into_boxed_slice();
        slots[idx] = Slot::Stored;
        Ok(Self {
            schema,
            baseline: Some(Arc::new(baseline)),
            slots,
            dirty: DirtySet::default(),
            is_new: false,
            partial: true,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Whether this state was never persisted.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Whether this is a stub whose stored content was never fetched.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// The wire document this state was decoded from or last persisted as.
    pub fn baseline(&self) -> Option<&WireDocument> {
        self.baseline.as_deref()
    }

    pub(crate) fn slot(&self, idx: usize) -> &Slot {
        &self.slots[idx]
    }

    pub(crate) fn is_field_dirty(&self, idx: usize) -> bool {
        self.dirty.contains(idx)
    }

    /// The baseline's wire value for `field`, if it has one.
    pub(crate) fn stored_value(&self, field: &Field) -> Option<&WireValue> {
        self.baseline.as_ref()?.get(field.wire_key())
    }

    /// Reads a field, decoding and memoizing it if it was stored and creating its default if it
    /// is unset.
    ///
    /// Returns `Ok(None)` for an unset field without a default.
    pub fn get(&mut self, name: &str) -> Result<Option<&Value>, Error> {
        let idx = self.schema.index_of(name)?;
        Ok(self.materialize(idx)?.map(|v| &*v))
    }

    /// Reads a field without memoizing anything. Stored fields are decoded from the baseline on
    /// every call.
    pub fn peek(&self, name: &str) -> Result<Option<Value>, Error> {
        let idx = self.schema.index_of(name)?;
        let field = self.schema.field_at(idx);
        match &self.slots[idx] {
            Slot::Absent => Ok(None),
            Slot::Loaded(value) => Ok(Some(value.clone())),
            Slot::Stored => match self.stored_value(field) {
                Some(wire) => Ok(Some(codec::decode_value(
                    field.kind(),
                    wire,
                    &FieldPath::key(field.name()),
                    DecodeOptions::default(),
                )?)),
                None => Ok(None),
            },
        }
    }

    /// Validates `value` against the field and stores it.
    ///
    /// On failure the state is left exactly as it was.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        let idx = self.schema.index_of(name)?;
        let value = self.schema.field_at(idx).validate_value(value.into())?;
        self.slots[idx] = Slot::Loaded(value);
        self.dirty.insert(idx);
        Ok(())
    }

    /// Returns the field to its default, or to absence if it has none.
    pub fn unset(&mut self, name: &str) -> Result<(), Error> {
        let idx = self.schema.index_of(name)?;
        self.slots[idx] = match self.schema.field_at(idx).default_value()? {
            Some(default) => Slot::Loaded(default),
            None => Slot::Absent,
        };
        self.dirty.insert(idx);
        Ok(())
    }

    /// Appends `item` to a list field, starting from an empty list if the field is unset.
    pub fn push(&mut self, name: &str, item: impl Into<Value>) -> Result<(), Error> {
        let idx = self.schema.index_of(name)?;
        let field = self.schema.field_at(idx);
        if !matches!(field.kind(), FieldKind::List(_)) {
            return Err(ValidationError::new(
                FieldPath::key(field.name()),
                format!("cannot push to a field of kind {:?}", field.kind()),
            )
            .into());
        }
        let item = item.into();
        self.edit(idx, |current| {
            let mut items = match current {
                Some(Value::List(items)) => items,
                _ => Vec::new(),
            };
            items.push(item);
            Ok(Value::List(items))
        })
    }

    /// Applies `edit` to a copy of the field's current value, then validates and stores the
    /// result. Unset fields without a default cannot be updated.
    pub fn update(&mut self, name: &str, edit: impl FnOnce(&mut Value)) -> Result<(), Error> {
        let idx = self.schema.index_of(name)?;
        self.edit(idx, |current| {
            let mut value = current.ok_or_else(|| {
                ValidationError::new(FieldPath::key(name), "field has no value to update")
            })?;
            edit(&mut value);
            Ok(value)
        })
    }

    /// Borrows an embedded document for in-place mutation.
    ///
    /// Changes made through the returned state are tracked by it, so the parent records
    /// nothing and a later update addresses the nested fields by dotted path. An unset
    /// embedded field is initialized with an empty document first, which does mark the parent.
    pub fn embedded_mut(&mut self, name: &str) -> Result<&mut InstanceState, Error> {
        let idx = self.schema.index_of(name)?;
        let field = self.schema.field_at(idx);
        let FieldKind::Embedded(embedded) = field.kind() else {
            return Err(ValidationError::new(
                FieldPath::key(field.name()),
                format!("field of kind {:?} is not an embedded document", field.kind()),
            )
            .into());
        };
        let embedded = Arc::clone(embedded);
        self.require_fetched(idx)?;
        if self.materialize(idx)?.is_none() {
            self.slots[idx] = Slot::Loaded(Value::Embedded(Box::new(InstanceState::new(embedded)?)));
            self.dirty.insert(idx);
        }
        match &mut self.slots[idx] {
            Slot::Loaded(Value::Embedded(state)) => Ok(&mut **state),
            _ => unreachable!("materialized embedded slot holds an embedded value"),
        }
    }

    /// The reference token stored in a reference field, read without materializing the slot.
    pub fn reference(&self, name: &str) -> Result<Option<ReferenceToken>, Error> {
        let field = self.schema.resolve(name)?;
        let FieldKind::Reference(_) = field.kind() else {
            return Err(ValidationError::new(
                FieldPath::key(field.name()),
                format!("field of kind {:?} is not a reference", field.kind()),
            )
            .into());
        };
        Ok(self.peek(name)?.and_then(|value| match value {
            Value::Reference(token) => Some(token),
            _ => None,
        }))
    }

    /// The identity value in its wire form, once assigned.
    pub fn identity(&self) -> Option<WireValue> {
        let idx = self.schema.identity_index()?;
        match &self.slots[idx] {
            Slot::Absent => None,
            Slot::Stored => self.stored_value(self.schema.field_at(idx)).cloned(),
            Slot::Loaded(value) => Some(codec::untyped(value)),
        }
    }

    /// Records the identity assigned by the store. Does not mark the field dirty.
    pub(crate) fn assign_identity(&mut self, id: &WireValue) -> Result<(), Error> {
        let Some(idx) = self.schema.identity_index() else {
            return Ok(());
        };
        let field = self.schema.field_at(idx);
        let value = codec::decode_value(
            field.kind(),
            id,
            &FieldPath::key(field.name()),
            DecodeOptions::default(),
        )?;
        self.slots[idx] = Slot::Loaded(value);
        Ok(())
    }

    /// Decodes every stored slot, recursively.
    pub fn materialize_all(&mut self) -> Result<(), Error> {
        for idx in 0..self.slots.len() {
            if let Some(Value::Embedded(nested)) = self.materialize(idx)? {
                nested.materialize_all()?;
            }
        }
        Ok(())
    }

    pub(crate) fn materialize(&mut self, idx: usize) -> Result<Option<&mut Value>, Error> {
        let field = self.schema.field_at(idx);
        match self.slots[idx] {
            Slot::Stored => {
                let wire = self
                    .baseline
                    .as_ref()
                    .and_then(|baseline| baseline.get(field.wire_key()));
                self.slots[idx] = match wire {
                    Some(wire) => {
                        trace!(document = self.schema.name(), field = field.name(), "materializing stored field");
                        Slot::Loaded(codec::decode_value(
                            field.kind(),
                            wire,
                            &FieldPath::key(field.name()),
                            DecodeOptions::default(),
                        )?)
                    }
                    None => Slot::Absent,
                };
            }
            // a stub does not know whether the store holds a value
            Slot::Absent if self.partial => {}
            Slot::Absent => {
                if let Some(default) = field.default_value()? {
                    self.slots[idx] = Slot::Loaded(default);
                    self.dirty.insert(idx);
                }
            }
            Slot::Loaded(_) => {}
        }
        Ok(match &mut self.slots[idx] {
            Slot::Loaded(value) => Some(value),
            _ => None,
        })
    }

    /// Builds the replacement value from a copy of the current one, validates it, and stores
    /// it only if validation succeeds.
    fn edit(
        &mut self,
        idx: usize,
        build: impl FnOnce(Option<Value>) -> Result<Value, ValidationError>,
    ) -> Result<(), Error> {
        self.require_fetched(idx)?;
        let current = self.materialize(idx)?.cloned();
        let value = self.schema.field_at(idx).validate_value(build(current)?)?;
        self.slots[idx] = Slot::Loaded(value);
        self.dirty.insert(idx);
        Ok(())
    }

    /// Edits that start from the current value need it to be known.
    fn require_fetched(&self, idx: usize) -> Result<(), Error> {
        if self.partial && matches!(self.slots[idx], Slot::Absent) {
            return Err(Error::NotLoaded {
                document: self.schema.class_name().to_string(),
                name: self.schema.field_at(idx).name().to_string(),
            });
        }
        Ok(())
    }

    /// Whether anything changed since the last load or successful persistence, including
    /// in-place changes to embedded documents.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
            || self.slots.iter().any(|slot| {
                matches!(slot, Slot::Loaded(Value::Embedded(nested)) if nested.is_dirty())
            })
    }

    /// The paths that changed, using wire keys, with in-place embedded changes reported as
    /// dotted paths.
    pub fn changed_paths(&self) -> Vec<FieldPath> {
        let mut out = Vec::new();
        self.collect_changed_paths(&FieldPath::root(), &mut out);
        out
    }

    fn collect_changed_paths(&self, prefix: &FieldPath, out: &mut Vec<FieldPath>) {
        for (idx, field) in self.schema.fields().iter().enumerate() {
            let path = prefix.child(field.wire_key());
            if self.dirty.contains(idx) {
                out.push(path);
            } else if let Slot::Loaded(Value::Embedded(nested)) = &self.slots[idx] {
                nested.collect_changed_paths(&path, out);
            }
        }
    }

    /// Computes what must be written to bring the stored document up to date.
    pub fn snapshot_dirty(&self) -> Result<ChangeSet, Error> {
        changes::compute(self)
    }

    /// Clears the dirty set after a confirmed write and makes `persisted` the new baseline.
    ///
    /// Embedded documents are rebased onto their part of `persisted`, so later in-place edits
    /// diff against what was just written.
    pub fn mark_clean(&mut self, persisted: WireDocument) {
        self.rebase(Arc::new(persisted));
        self.is_new = false;
    }

    /// Treats the state as never persisted again, as for a document that was deleted from the
    /// store. The baseline is kept only to back stored slots; the next save inserts in full.
    pub(crate) fn mark_new(&mut self) {
        self.is_new = true;
        for (idx, slot) in self.slots.iter().enumerate() {
            if !matches!(slot, Slot::Absent) {
                self.dirty.insert(idx);
            }
        }
    }

    fn rebase(&mut self, baseline: Arc<WireDocument>) {
        self.dirty.clear();
        for (idx, field) in self.schema.fields().iter().enumerate() {
            if let Slot::Loaded(Value::Embedded(nested)) = &mut self.slots[idx] {
                if let Some(WireValue::Document(sub)) = baseline.get(field.wire_key()) {
                    nested.rebase(Arc::new(sub.clone()));
                    nested.is_new = false;
                }
            }
        }
        self.baseline = Some(baseline);
    }
}

impl PartialEq for InstanceState {
    /// Two states are equal when they have the same type and the same content.
    fn eq(&self, other: &Self) -> bool {
        self.schema.class_name() == other.schema.class_name()
            && codec::encode_lenient(self) == codec::encode_lenient(other)
    }
}

impl fmt::Debug for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dirty: Vec<&str> = self
            .dirty
            .iter()
            .map(|idx| self.schema.field_at(idx).name())
            .collect();
        f.debug_struct("InstanceState")
            .field("schema", &self.schema.class_name())
            .field("values", &WireValue::Document(codec::encode_lenient(self)).to_string())
            .field("dirty", &dirty)
            .field("is_new", &self.is_new)
            .finish()
    }
}
