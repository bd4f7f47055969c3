// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Minimal partial updates.
//!
//! [`compute`] turns an [`InstanceState`] into the [`ChangeSet`] that brings its stored copy up
//! to date. A state that was never persisted yields [`ChangeSet::Replace`] with the full
//! encoding. Otherwise only dirty fields are visited, in schema order, and each yields at most
//! one [`Change`]:
//!
//! - a field whose encoding equals the baseline's yields nothing,
//! - an unset field yields [`Operation::Unset`],
//! - a list that only grew at the end yields [`Operation::Push`] of the new tail,
//! - a list that only lost every occurrence of some values yields [`Operation::Remove`],
//! - anything else yields [`Operation::Set`] of the whole field.
//!
//! Embedded documents that were edited in place (and never replaced as a whole) are visited
//! recursively, producing dotted paths such as `address.city`. Lists are never addressed by
//! element index. A document of an inheritable class whose baseline lacks the class tag also
//! gets it set.
//!
//! Applying the change-set to the baseline with [`ChangeSet::apply_to`] yields exactly the full
//! encoding of the state.
use crate::{
    codec,
    error::Error,
    path::FieldPath,
    schema::CLASS_KEY,
    state::{InstanceState, Slot},
    value::Value,
    wire::{WireDocument, WireValue},
};
use std::fmt;

/// What to do at a path.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum Operation {
    Set(WireValue),
    Unset,
    /// Append these values to the list at the path.
    Push(Vec<WireValue>),
    /// Remove every occurrence of these values from the list at the path.
    Remove(Vec<WireValue>),
}

/// One path-scoped mutation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Change {
    /// Dotted wire keys, relative to the document root.
    pub path: FieldPath,
    pub op: Operation,
}

impl Change {
    pub fn set(path: impl Into<FieldPath>, value: impl Into<WireValue>) -> Self {
        Self {
            path: path.into(),
            op: Operation::Set(value.into()),
        }
    }

    pub fn unset(path: impl Into<FieldPath>) -> Self {
        Self {
            path: path.into(),
            op: Operation::Unset,
        }
    }
}

/// What a persistence call must write.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum ChangeSet {
    /// Write the whole document.
    Replace(WireDocument),
    /// Apply these changes, in order, to the stored document.
    Update(Vec<Change>),
}

impl ChangeSet {
    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        matches!(self, ChangeSet::Update(changes) if changes.is_empty())
    }

    /// The number of operations; a replacement counts as one.
    pub fn len(&self) -> usize {
        match self {
            ChangeSet::Replace(_) => 1,
            ChangeSet::Update(changes) => changes.len(),
        }
    }

    pub fn changes(&self) -> &[Change] {
        match self {
            ChangeSet::Replace(_) => &[],
            ChangeSet::Update(changes) => changes,
        }
    }

    /// Applies the change-set to `doc` with document-store update semantics.
    ///
    /// Intermediate documents on a dotted path are created as needed. Pushing to a missing
    /// field creates the list.
    pub fn apply_to(&self, doc: &mut WireDocument) {
        match self {
            ChangeSet::Replace(replacement) => doc.clone_from(replacement),
            ChangeSet::Update(changes) => {
                for change in changes {
                    apply_change(doc, change);
                }
            }
        }
    }
}

fn apply_change(doc: &mut WireDocument, change: &Change) {
    let mut segments = change.path.segments();
    let Some(leaf) = segments.next_back() else {
        return;
    };
    let mut target = doc;
    for segment in segments {
        let entry = target
            .entry(segment.to_string())
            .or_insert_with(|| WireValue::Document(WireDocument::default()));
        if !matches!(entry, WireValue::Document(_)) {
            *entry = WireValue::Document(WireDocument::default());
        }
        let WireValue::Document(next) = entry else {
            unreachable!("replaced with a document above");
        };
        target = next;
    }
    match &change.op {
        Operation::Set(value) => {
            target.insert(leaf.to_string(), value.clone());
        }
        Operation::Unset => {
            target.shift_remove(leaf);
        }
        Operation::Push(values) => {
            let entry = target
                .entry(leaf.to_string())
                .or_insert_with(|| WireValue::Array(Vec::new()));
            match entry {
                WireValue::Array(items) => items.extend(values.iter().cloned()),
                other => *other = WireValue::Array(values.clone()),
            }
        }
        Operation::Remove(values) => {
            if let Some(WireValue::Array(items)) = target.get_mut(leaf) {
                items.retain(|item| !values.contains(item));
            }
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = |values: &[WireValue]| WireValue::Array(values.to_vec());
        match &self.op {
            Operation::Set(value) => write!(f, "$set {}: {value}", self.path),
            Operation::Unset => write!(f, "$unset {}", self.path),
            Operation::Push(pushed) => write!(f, "$push {}: {}", self.path, values(pushed)),
            Operation::Remove(removed) => write!(f, "$pull {}: {}", self.path, values(removed)),
        }
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeSet::Replace(doc) => write!(f, "$replace {}", WireValue::Document(doc.clone())),
            ChangeSet::Update(changes) => {
                for (i, change) in changes.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{change}")?;
                }
                Ok(())
            }
        }
    }
}

/// Computes the change-set that brings the persisted copy of `state` up to date.
pub fn compute(state: &InstanceState) -> Result<ChangeSet, Error> {
    match state.baseline() {
        Some(baseline) if !state.is_new() => {
            let mut changes = Vec::new();
            collect(state, baseline, &FieldPath::root(), &FieldPath::root(), &mut changes)?;
            Ok(ChangeSet::Update(changes))
        }
        _ => Ok(ChangeSet::Replace(codec::encode(state)?)),
    }
}

/// Appends the changes of `state` relative to `baseline`. `at` addresses wire keys, `named`
/// addresses attribute names for error reporting.
fn collect(
    state: &InstanceState,
    baseline: &WireDocument,
    at: &FieldPath,
    named: &FieldPath,
    out: &mut Vec<Change>,
) -> Result<(), Error> {
    let schema = state.schema();
    if schema.allows_inheritance() && !state.is_partial() && !baseline.contains_key(CLASS_KEY) {
        out.push(Change::set(at.child(CLASS_KEY), schema.class_name()));
    }
    for (idx, field) in schema.fields().iter().enumerate() {
        let path = at.child(field.wire_key());
        if schema.catch_all_index() == Some(idx) {
            if state.is_field_dirty(idx) {
                collect_extras(state, idx, baseline, at, out);
            }
            continue;
        }
        if !state.is_field_dirty(idx) {
            match (state.slot(idx), baseline.get(field.wire_key())) {
                (Slot::Loaded(Value::Embedded(nested)), Some(WireValue::Document(sub))) => {
                    collect(nested, sub, &path, &named.child(field.name()), out)?;
                }
                (Slot::Absent, _) if field.is_required() && !state.is_partial() => {
                    if field.default_value()?.is_none() {
                        return Err(Error::MissingField {
                            path: named.child(field.name()),
                        });
                    }
                }
                _ => {}
            }
            continue;
        }

        let current = match state.slot(idx) {
            Slot::Loaded(value) => codec::encode_value(value, &named.child(field.name()), true)?,
            Slot::Stored => match state.stored_value(field) {
                Some(stored) => stored.clone(),
                None => continue,
            },
            Slot::Absent if field.is_required() => {
                return Err(Error::MissingField {
                    path: named.child(field.name()),
                });
            }
            Slot::Absent => {
                if baseline.contains_key(field.wire_key()) || state.is_partial() {
                    out.push(Change::unset(path));
                }
                continue;
            }
        };
        if let Some(op) = diff(baseline.get(field.wire_key()), current) {
            out.push(Change { path, op });
        }
    }
    Ok(())
}

/// The cheapest operation that turns `old` into `new`, if they differ.
fn diff(old: Option<&WireValue>, new: WireValue) -> Option<Operation> {
    let Some(old) = old else {
        return Some(Operation::Set(new));
    };
    if *old == new {
        return None;
    }
    if let (WireValue::Array(before), WireValue::Array(after)) = (old, &new) {
        if after.len() > before.len() && after.starts_with(before) {
            return Some(Operation::Push(after[before.len()..].to_vec()));
        }
        if after.len() < before.len() {
            let mut removed: Vec<WireValue> = Vec::new();
            for item in before {
                if !after.contains(item) && !removed.contains(item) {
                    removed.push(item.clone());
                }
            }
            let survivors = before.iter().filter(|item| !removed.contains(item));
            if !removed.is_empty() && survivors.eq(after.iter()) {
                return Some(Operation::Remove(removed));
            }
        }
    }
    Some(Operation::Set(new))
}

/// Diffs the catch-all bucket, whose entries live at the top level of the document.
fn collect_extras(
    state: &InstanceState,
    idx: usize,
    baseline: &WireDocument,
    at: &FieldPath,
    out: &mut Vec<Change>,
) {
    let schema = state.schema();
    let current = match state.slot(idx) {
        Slot::Loaded(Value::Dynamic(WireValue::Document(extras))) => Some(extras),
        _ => None,
    };
    let is_extra = |key: &str| {
        schema
            .index_of_wire_key(key)
            .is_none_or(|i| i == idx)
            && !(key == CLASS_KEY && schema.allows_inheritance())
    };
    for (key, old) in baseline.iter().filter(|(key, _)| is_extra(key.as_str())) {
        match current.and_then(|extras| extras.get(key)) {
            None => out.push(Change::unset(at.child(key.as_str()))),
            Some(new) if new != old => out.push(Change::set(at.child(key.as_str()), new.clone())),
            Some(_) => {}
        }
    }
    for (key, new) in current.into_iter().flatten() {
        if !baseline.contains_key(key) {
            out.push(Change::set(at.child(key.as_str()), new.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schema::{Field, FieldKind, Schema},
        wire_doc,
    };
    use insta::assert_snapshot;
    use std::sync::Arc;

    fn person() -> Arc<Schema> {
        let address = Schema::embedded("Address")
            .field(Field::string("city").required())
            .field(Field::string("street"))
            .build()
            .unwrap();
        Schema::builder("Person")
            .field(Field::string("name").required().db_field("n"))
            .field(Field::int("age"))
            .field(Field::embedded("address", &address))
            .field(Field::list("tags", FieldKind::String))
            .build()
            .unwrap()
    }

    fn loaded(wire: WireDocument) -> InstanceState {
        codec::decode(&person(), wire).unwrap()
    }

    fn assert_applies(state: &InstanceState) {
        let changes = compute(state).unwrap();
        let mut stored = state.baseline().cloned().unwrap_or_default();
        changes.apply_to(&mut stored);
        assert_eq!(stored, codec::encode(state).unwrap());
    }

    #[test]
    fn new_documents_are_replaced_whole() {
        let mut state = InstanceState::new(person()).unwrap();
        state.set("name", "Ann").unwrap();
        let changes = compute(&state).unwrap();
        assert_snapshot!(changes, @r#"$replace {"n": "Ann"}"#);
    }

    #[test]
    fn one_scalar_change_is_one_operation() {
        let mut state = loaded(wire_doc! { "n" => "Ann", "age" => 30 });
        state.set("age", 31).unwrap();
        let changes = compute(&state).unwrap();
        assert_eq!(changes.changes(), [Change::set("age", 31)]);
        assert_applies(&state);
    }

    #[test]
    fn rewriting_the_same_value_is_not_a_change() {
        let mut state = loaded(wire_doc! { "n" => "Ann", "age" => 30 });
        state.set("age", 30).unwrap();
        assert!(compute(&state).unwrap().is_empty());
    }

    #[test]
    fn unset_fields_are_unset() {
        let mut state = loaded(wire_doc! { "n" => "Ann", "age" => 30 });
        state.unset("age").unwrap();
        assert_snapshot!(compute(&state).unwrap(), @"$unset age");
        assert_applies(&state);
    }

    #[test]
    fn unsetting_a_required_field_fails() {
        let mut state = loaded(wire_doc! { "n" => "Ann" });
        state.unset("name").unwrap();
        assert_eq!(
            compute(&state).unwrap_err(),
            Error::MissingField {
                path: FieldPath::key("name")
            }
        );
    }

    #[test]
    fn appends_become_pushes() {
        let mut state = loaded(wire_doc! { "n" => "Ann", "tags" => WireValue::array(["a"]) });
        state.push("tags", "b").unwrap();
        state.push("tags", "c").unwrap();
        assert_snapshot!(compute(&state).unwrap(), @r#"$push tags: ["b", "c"]"#);
        assert_applies(&state);
    }

    #[test]
    fn removals_become_pulls() {
        let mut state = loaded(wire_doc! {
            "n" => "Ann",
            "tags" => WireValue::array(["a", "b", "a", "c"]),
        });
        state
            .update("tags", |tags| {
                if let Some(items) = tags.as_list_mut() {
                    items.retain(|t| t != "a");
                }
            })
            .unwrap();
        assert_snapshot!(compute(&state).unwrap(), @r#"$pull tags: ["a"]"#);
        assert_applies(&state);
    }

    #[test]
    fn reorders_fall_back_to_set() {
        let mut state = loaded(wire_doc! { "n" => "Ann", "tags" => WireValue::array(["a", "b"]) });
        state.set("tags", Value::list(["b", "a"])).unwrap();
        assert_snapshot!(compute(&state).unwrap(), @r#"$set tags: ["b", "a"]"#);
        assert_applies(&state);
    }

    #[test]
    fn in_place_embedded_edits_use_dotted_paths() {
        let mut state = loaded(wire_doc! {
            "n" => "Ann",
            "address" => wire_doc! { "city" => "Oslo", "street" => "Main" },
        });
        let address = state.embedded_mut("address").unwrap();
        address.set("city", "Bergen").unwrap();
        address.unset("street").unwrap();
        assert_snapshot!(compute(&state).unwrap(), @r#"
        $set address.city: "Bergen"
        $unset address.street
        "#);
        assert_applies(&state);
    }

    #[test]
    fn replaced_embedded_documents_are_set_whole() {
        let mut state = loaded(wire_doc! {
            "n" => "Ann",
            "address" => wire_doc! { "city" => "Oslo" },
        });
        let schema = person();
        let FieldKind::Embedded(address_schema) = schema.resolve("address").unwrap().kind() else {
            unreachable!()
        };
        let mut address = InstanceState::new(Arc::clone(address_schema)).unwrap();
        address.set("city", "Bergen").unwrap();
        state.set("address", address).unwrap();
        assert_snapshot!(compute(&state).unwrap(), @r#"$set address: {"city": "Bergen"}"#);
        assert_applies(&state);
    }

    #[test]
    fn catch_all_entries_are_diffed_at_the_top_level() {
        let schema = Schema::builder("Event")
            .field(Field::string("kind"))
            .field(Field::dynamic("extra").catch_all())
            .build()
            .unwrap();
        let mut state = codec::decode(&schema, wire_doc! { "kind" => "click", "x" => 1, "y" => 2 }).unwrap();
        state
            .set("extra", WireValue::Document(wire_doc! { "x" => 5, "z" => 3 }))
            .unwrap();
        assert_snapshot!(compute(&state).unwrap(), @r"
        $set x: 5
        $unset y
        $set z: 3
        ");
        let changes = compute(&state).unwrap();
        let mut stored = state.baseline().cloned().unwrap();
        changes.apply_to(&mut stored);
        assert_eq!(stored, codec::encode(&state).unwrap());
    }

    #[test]
    fn missing_class_tags_are_written() {
        let animal = Schema::builder("Animal")
            .allow_inheritance()
            .field(Field::string("name"))
            .build()
            .unwrap();
        let mut rex = codec::decode(&animal, wire_doc! { "name" => "Rex" }).unwrap();
        rex.set("name", "Rex II").unwrap();
        assert_snapshot!(compute(&rex).unwrap(), @r#"
        $set _cls: "Animal"
        $set name: "Rex II"
        "#);
        assert_applies(&rex);

        let tagged = codec::decode(&animal, wire_doc! { "_cls" => "Animal", "name" => "Rex" }).unwrap();
        assert!(compute(&tagged).unwrap().is_empty());
    }

    #[test]
    fn required_fields_missing_from_the_baseline_fail() {
        let mut state = loaded(wire_doc! { "age" => 30 });
        state.set("age", 31).unwrap();
        assert_eq!(
            compute(&state).unwrap_err(),
            Error::MissingField {
                path: FieldPath::key("name")
            }
        );
        assert_eq!(compute(&state).unwrap_err(), codec::encode(&state).unwrap_err());
    }

    #[test]
    fn catch_all_fields_only_hold_documents() {
        let schema = Schema::builder("Event")
            .field(Field::string("kind"))
            .field(Field::dynamic("extra").catch_all())
            .build()
            .unwrap();
        let mut state = codec::decode(&schema, wire_doc! { "kind" => "click", "x" => 1 }).unwrap();
        let err = state.set("extra", WireValue::Int(5)).unwrap_err();
        assert_snapshot!(err, @"invalid value for `extra`: a catch-all field holds a document of extra keys, got int");
        assert!(compute(&state).unwrap().is_empty());

        state.set("extra", Value::map([("x", 2)])).unwrap();
        assert_snapshot!(compute(&state).unwrap(), @"$set x: 2");
        assert_applies(&state);
    }

    #[test]
    fn apply_creates_intermediate_documents() {
        let mut doc = WireDocument::default();
        ChangeSet::Update(vec![
            Change::set("a.b", 1),
            Change {
                path: "list".into(),
                op: Operation::Push(vec![1.into()]),
            },
        ])
        .apply_to(&mut doc);
        assert_eq!(
            doc,
            wire_doc! { "a" => wire_doc! { "b" => 1 }, "list" => WireValue::array([1]) }
        );
    }
}
