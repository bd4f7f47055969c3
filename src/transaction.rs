// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! All-or-nothing batches of field edits.
use crate::{error::Error, state::InstanceState, value::Value, wire::ReferenceToken};

/// A batch of edits to one document that is applied only when committed.
///
/// # Eager Application with Rollback
///
/// Every edit is validated and applied immediately to a working copy of the document's
/// state, so reads through the transaction see earlier edits of the same transaction. If
/// the transaction is dropped without calling [`commit`](Self::commit), the working copy
/// is discarded and the document is left exactly as it was, even if some edits succeeded.
///
/// # Borrowing
///
/// A transaction exclusively borrows the document until it is committed or dropped.
///
/// # Example
///
/// ```
/// # use docmap::{Document, schema::{Field, Schema}};
/// let person = Schema::builder("Person")
///     .field(Field::string("name"))
///     .field(Field::int("age").validate(|v| v.as_i64().is_some_and(|a| a >= 0), "must not be negative"))
///     .build()?;
/// let mut ann = Document::with_values(&person, [("name", "Ann")])?;
///
/// let mut tx = ann.transact();
/// tx.set("name", "Annie")?;
/// assert!(tx.set("age", -1).is_err());
/// drop(tx);
/// assert_eq!(ann.peek("name")?, Some("Ann".into()));
///
/// let mut tx = ann.transact();
/// tx.set("name", "Annie")?;
/// tx.set("age", 31)?;
/// tx.commit();
/// assert_eq!(ann.peek("age")?, Some(31.into()));
/// # Ok::<(), docmap::Error>(())
/// ```
pub struct EditTransaction<'a> {
    original: &'a mut InstanceState,
    working: InstanceState,
}

impl<'a> EditTransaction<'a> {
    /// Starts a transaction on `state`.
    ///
    /// The state is cloned and exclusively borrowed until the transaction ends.
    pub fn new(state: &'a mut InstanceState) -> Self {
        let working = state.clone();
        Self {
            working,
            original: state,
        }
    }

    /// Reads a field as the transaction currently sees it.
    pub fn get(&mut self, name: &str) -> Result<Option<&Value>, Error> {
        self.working.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        self.working.set(name, value)
    }

    pub fn unset(&mut self, name: &str) -> Result<(), Error> {
        self.working.unset(name)
    }

    pub fn push(&mut self, name: &str, item: impl Into<Value>) -> Result<(), Error> {
        self.working.push(name, item)
    }

    pub fn update(&mut self, name: &str, edit: impl FnOnce(&mut Value)) -> Result<(), Error> {
        self.working.update(name, edit)
    }

    pub fn embedded_mut(&mut self, name: &str) -> Result<&mut InstanceState, Error> {
        self.working.embedded_mut(name)
    }

    pub fn reference(&self, name: &str) -> Result<Option<ReferenceToken>, Error> {
        self.working.reference(name)
    }

    /// Whether the transaction has made any edit that commit would apply.
    pub fn is_dirty(&self) -> bool {
        self.working.is_dirty()
    }

    /// Applies every edit to the document.
    pub fn commit(self) {
        *self.original = self.working;
    }

    /// Discards every edit. Equivalent to dropping the transaction.
    pub fn rollback(self) {}
}
