// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Document schemas.
//!
//! A [`Schema`] is the shared, immutable type description of one document type: an ordered list
//! of [`Field`]s plus the metadata the codec and the change-set computer need (identity field,
//! reference fields, catch-all field, wire-key lookup). It is built once, wrapped in an [`Arc`],
//! and shared by every instance of the type.
//!
//! ```rust
//! # use docmap::schema::{Field, Schema};
//! let person = Schema::builder("Person")
//!     .field(Field::string("name").required())
//!     .field(Field::int("age"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(person.collection(), Some("person"));
//! // documents without a declared identity get an implicit one
//! assert_eq!(person.identity_field().map(|f| f.wire_key()), Some("_id"));
//! assert!(person.resolve("nickname").is_err());
//! ```
use crate::error::{ConfigurationError, Error};
use smallvec::SmallVec;
use std::{collections::HashMap, fmt, sync::Arc};

pub mod field;
pub mod registry;

pub use field::{DefaultValue, Field, FieldKind, Validator};
pub use registry::SchemaRegistry;

/// Wire key the identity field is stored under unless renamed.
pub const IDENTITY_KEY: &str = "_id";

/// Wire key holding the concrete class name of documents whose schema allows inheritance.
pub const CLASS_KEY: &str = "_cls";

type Lookup = HashMap<String, usize, ahash::RandomState>;

/// What decode does with wire keys the schema does not declare.
///
/// Keys are always routed to the catch-all dynamic field first, if the schema has one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UnknownFields {
    /// Drop them (forward compatibility).
    #[default]
    Ignore,
    /// Fail the decode.
    Reject,
}

/// The immutable type description of a document.
pub struct Schema {
    name: String,
    class_name: String,
    collection: Option<String>,
    embedded: bool,
    allow_inheritance: bool,
    unknown_fields: UnknownFields,
    parent: Option<Arc<Schema>>,
    fields: Vec<Field>,
    by_name: Lookup,
    by_wire_key: Lookup,
    identity: Option<usize>,
    catch_all: Option<usize>,
    references: SmallVec<[usize; 4]>,
}

impl Schema {
    /// Starts declaring a top-level document type.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name.into(), false)
    }

    /// Starts declaring a document type that is only ever stored inside another document.
    ///
    /// Embedded schemas have no collection and no identity.
    pub fn embedded(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name.into(), true)
    }

    /// The type name given at declaration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dotted class name (`Parent.Child`) written under [`CLASS_KEY`] and used by
    /// reference tokens.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The collection top-level documents of this type are stored in.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    pub fn allows_inheritance(&self) -> bool {
        self.allow_inheritance
    }

    pub fn unknown_fields(&self) -> UnknownFields {
        self.unknown_fields
    }

    pub fn parent(&self) -> Option<&Arc<Schema>> {
        self.parent.as_ref()
    }

    /// Whether `self` is `other` or derives from it.
    pub fn is_a(&self, other: &Schema) -> bool {
        let mut current = Some(self);
        while let Some(schema) = current {
            if std::ptr::eq(schema, other) || schema.class_name == other.class_name {
                return true;
            }
            current = schema.parent.as_deref();
        }
        false
    }

    /// All fields, in declaration order (inherited fields first).
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn field_at(&self, index: usize) -> &Field {
        &self.fields[index]
    }

    /// Looks up a field by attribute name.
    pub fn resolve(&self, name: &str) -> Result<&Field, Error> {
        self.index_of(name).map(|idx| &self.fields[idx])
    }

    /// The declaration index of the field with attribute name `name`.
    pub fn index_of(&self, name: &str) -> Result<usize, Error> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::unknown_field(&self.name, name))
    }

    /// The declaration index of the field stored under wire key `key`.
    pub fn index_of_wire_key(&self, key: &str) -> Option<usize> {
        self.by_wire_key.get(key).copied()
    }

    pub fn identity_field(&self) -> Option<&Field> {
        self.identity.map(|idx| &self.fields[idx])
    }

    pub fn identity_index(&self) -> Option<usize> {
        self.identity
    }

    /// The catch-all dynamic field unknown wire keys are collected into.
    pub fn catch_all_field(&self) -> Option<&Field> {
        self.catch_all.map(|idx| &self.fields[idx])
    }

    pub(crate) fn catch_all_index(&self) -> Option<usize> {
        self.catch_all
    }

    /// Fields whose kind is a reference to another document type.
    pub fn reference_fields(&self) -> impl Iterator<Item = &Field> {
        self.references.iter().map(|&idx| &self.fields[idx])
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("class_name", &self.class_name)
            .field("collection", &self.collection)
            .field("fields", &self.fields.iter().map(Field::name).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Declares a [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    collection: Option<String>,
    embedded: bool,
    allow_inheritance: bool,
    unknown_fields: UnknownFields,
    parent: Option<Arc<Schema>>,
    fields: Vec<Field>,
}

impl SchemaBuilder {
    fn new(name: String, embedded: bool) -> Self {
        Self {
            name,
            collection: None,
            embedded,
            allow_inheritance: false,
            unknown_fields: UnknownFields::default(),
            parent: None,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Overrides the collection name, which otherwise is the snake_case type name.
    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Lets other schemas extend this one; documents then carry their class name under
    /// [`CLASS_KEY`].
    #[must_use]
    pub fn allow_inheritance(mut self) -> Self {
        self.allow_inheritance = true;
        self
    }

    #[must_use]
    pub fn unknown_fields(mut self, policy: UnknownFields) -> Self {
        self.unknown_fields = policy;
        self
    }

    /// Derives from `parent`, inheriting its fields, collection and options.
    #[must_use]
    pub fn extends(mut self, parent: &Arc<Schema>) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    /// Validates the declaration and produces the shared schema.
    pub fn build(self) -> Result<Arc<Schema>, ConfigurationError> {
        let SchemaBuilder {
            name,
            collection,
            mut embedded,
            mut allow_inheritance,
            mut unknown_fields,
            parent,
            fields: declared,
        } = self;

        let mut fields = Vec::with_capacity(declared.len() + 1);
        let (class_name, collection) = match &parent {
            Some(parent) => {
                if !parent.allow_inheritance {
                    return Err(ConfigurationError::InheritanceNotAllowed {
                        document: name,
                        parent: parent.class_name.clone(),
                    });
                }
                embedded = parent.embedded;
                allow_inheritance = true;
                unknown_fields = parent.unknown_fields;
                fields.extend(parent.fields.iter().cloned());
                (
                    format!("{}.{name}", parent.class_name),
                    parent.collection.clone(),
                )
            }
            None if embedded => (name.clone(), None),
            None => (
                name.clone(),
                Some(collection.unwrap_or_else(|| snake_case(&name))),
            ),
        };
        fields.extend(declared);

        if !embedded && !fields.iter().any(Field::is_identity) {
            let implicit = implicit_identity_name(&fields);
            fields.insert(0, Field::id(implicit).identity());
        }

        let mut by_name = Lookup::with_capacity_and_hasher(fields.len(), Default::default());
        let mut by_wire_key = Lookup::with_capacity_and_hasher(fields.len(), Default::default());
        let mut identity: Option<usize> = None;
        let mut catch_all = None;
        let mut references = SmallVec::new();

        for field in &mut fields {
            if field.is_identity() {
                if embedded {
                    return Err(ConfigurationError::IdentityOnEmbedded {
                        document: name.clone(),
                        name: field.name().to_string(),
                    });
                }
                if field.has_explicit_wire_key() && field.wire_key() != IDENTITY_KEY {
                    return Err(ConfigurationError::InvalidOption {
                        document: name.clone(),
                        name: field.name().to_string(),
                        reason: format!("identity fields are always stored under `{IDENTITY_KEY}`"),
                    });
                }
                field.set_wire_key(IDENTITY_KEY);
            }
        }

        for (idx, field) in fields.iter().enumerate() {
            let invalid_option = |reason: &str| ConfigurationError::InvalidOption {
                document: name.clone(),
                name: field.name().to_string(),
                reason: reason.to_string(),
            };

            if by_name.insert(field.name().to_string(), idx).is_some() {
                return Err(ConfigurationError::DuplicateField {
                    document: name.clone(),
                    name: field.name().to_string(),
                });
            }
            if field.is_identity() {
                if let Some(first) = identity {
                    return Err(ConfigurationError::MultipleIdentityFields {
                        document: name.clone(),
                        first: fields[first].name().to_string(),
                        second: field.name().to_string(),
                    });
                }
                if !matches!(
                    field.kind(),
                    FieldKind::Id | FieldKind::String | FieldKind::Int
                ) {
                    return Err(invalid_option("identity fields must be id, string or int"));
                }
                identity = Some(idx);
            }

            let reserved = allow_inheritance && field.wire_key() == CLASS_KEY;
            if reserved || by_wire_key.insert(field.wire_key().to_string(), idx).is_some() {
                return Err(ConfigurationError::DuplicateWireKey {
                    document: name.clone(),
                    key: field.wire_key().to_string(),
                });
            }

            if field.is_catch_all() {
                if field.kind() != &FieldKind::Dynamic {
                    return Err(invalid_option("only dynamic fields can collect unknown keys"));
                }
                if catch_all.replace(idx).is_some() {
                    return Err(ConfigurationError::MultipleCatchAllFields {
                        document: name.clone(),
                    });
                }
            }

            if matches!(field.kind(), FieldKind::Reference(_)) {
                references.push(idx);
            }
        }

        for field in &mut fields {
            if let Some(DefaultValue::Value(value)) = field.default_source() {
                let coerced = field.validate_value(value.clone()).map_err(|e| {
                    ConfigurationError::InvalidDefault {
                        document: name.clone(),
                        name: field.name().to_string(),
                        reason: e.message.into_owned(),
                    }
                })?;
                field.replace_default(DefaultValue::Value(coerced));
            }
        }

        Ok(Arc::new(Schema {
            name,
            class_name,
            collection,
            embedded,
            allow_inheritance,
            unknown_fields,
            parent,
            fields,
            by_name,
            by_wire_key,
            identity,
            catch_all,
            references,
        }))
    }
}

fn implicit_identity_name(fields: &[Field]) -> String {
    let taken = |candidate: &str| fields.iter().any(|f| f.name() == candidate);
    if !taken("id") {
        return "id".to_string();
    }
    (0..)
        .map(|n| format!("auto_id_{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_default()
}

/// `BlogPost` becomes `blog_post`.
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    fn person() -> Arc<Schema> {
        Schema::builder("Person")
            .allow_inheritance()
            .field(Field::string("name").required())
            .field(Field::int("age"))
            .build()
            .unwrap()
    }

    #[test]
    fn collection_defaults_to_snake_case() {
        let schema = Schema::builder("BlogPost").build().unwrap();
        assert_eq!(schema.collection(), Some("blog_post"));
        let schema = Schema::builder("BlogPost").collection("posts").build().unwrap();
        assert_eq!(schema.collection(), Some("posts"));
    }

    #[test]
    fn implicit_identity_comes_first() {
        let schema = person();
        assert_eq!(schema.fields()[0].name(), "id");
        assert_eq!(schema.identity_index(), Some(0));
        assert!(!schema.identity_field().unwrap().is_required());
    }

    #[test]
    fn declared_identity_is_stored_as_underscore_id() {
        let schema = Schema::builder("User")
            .field(Field::string("email").identity())
            .build()
            .unwrap();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema.identity_field().unwrap().wire_key(), "_id");
        assert_eq!(schema.index_of_wire_key("_id"), Some(0));
        assert_eq!(schema.index_of_wire_key("email"), None);
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let err = Schema::builder("Person")
            .field(Field::string("name"))
            .field(Field::int("name"))
            .build()
            .unwrap_err();
        assert_snapshot!(err, @"document `Person` declares field `name` more than once");

        let err = Schema::builder("Person")
            .field(Field::string("name").db_field("n"))
            .field(Field::string("nick").db_field("n"))
            .build()
            .unwrap_err();
        assert_snapshot!(err, @"document `Person` maps more than one field to wire key `n`");
    }

    #[test]
    fn more_than_one_identity_is_rejected() {
        let err = Schema::builder("Account")
            .field(Field::string("email").identity())
            .field(Field::string("login").identity())
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MultipleIdentityFields {
                document: "Account".into(),
                first: "email".into(),
                second: "login".into(),
            }
        );
    }

    #[test]
    fn embedded_schemas_have_no_identity() {
        let address = Schema::embedded("Address")
            .field(Field::string("city"))
            .build()
            .unwrap();
        assert!(address.identity_field().is_none());
        assert!(address.collection().is_none());

        let err = Schema::embedded("Address")
            .field(Field::id("id").identity())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::IdentityOnEmbedded { .. }));
    }

    #[test]
    fn invalid_literal_defaults_are_rejected() {
        let err = Schema::builder("Person")
            .field(Field::int("age").default("thirty"))
            .build()
            .unwrap_err();
        assert_snapshot!(err, @"default for field `age` of `Person` is invalid: expected int, got string");
    }

    #[test]
    fn literal_defaults_are_stored_coerced() {
        let schema = Schema::builder("Gauge")
            .field(Field::float("level").default(1))
            .build()
            .unwrap();
        let level = schema.resolve("level").unwrap().default_value().unwrap();
        assert_eq!(level, Some(crate::value::Value::Float(1.0)));
    }

    #[test]
    fn subclasses_inherit_fields_and_collection() {
        let person = person();
        let employee = Schema::builder("Employee")
            .extends(&person)
            .field(Field::float("salary"))
            .build()
            .unwrap();
        assert_eq!(employee.class_name(), "Person.Employee");
        assert_eq!(employee.collection(), Some("person"));
        assert_eq!(
            employee.fields().iter().map(Field::name).collect::<Vec<_>>(),
            ["id", "name", "age", "salary"]
        );
        assert!(employee.is_a(&person));
        assert!(!person.is_a(&employee));
    }

    #[test]
    fn extending_requires_inheritance() {
        let base = Schema::builder("Base").build().unwrap();
        let err = Schema::builder("Derived").extends(&base).build().unwrap_err();
        assert!(matches!(err, ConfigurationError::InheritanceNotAllowed { .. }));
    }

    #[test]
    fn catch_all_must_be_dynamic() {
        let err = Schema::builder("Event")
            .field(Field::string("extra").catch_all())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidOption { .. }));

        let schema = Schema::builder("Event")
            .field(Field::dynamic("extra").catch_all())
            .build()
            .unwrap();
        assert_eq!(schema.catch_all_field().map(Field::name), Some("extra"));
    }

    #[test]
    fn reference_fields_are_indexed() {
        let schema = Schema::builder("Post")
            .field(Field::string("title"))
            .field(Field::reference("author", "Person"))
            .build()
            .unwrap();
        assert_eq!(
            schema.reference_fields().map(Field::name).collect::<Vec<_>>(),
            ["author"]
        );
    }
}
