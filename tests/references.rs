//! Tests for lazy reference resolution and the per-document reference cache.

use docmap::{
    Change, Document, DocumentStore, Error, FieldPath, MemoryStore, ReferenceToken, SchemaRegistry,
    StoreError, Value, WireDocument, WireValue,
    schema::{Field, FieldKind, Schema},
    wire_doc,
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// Counts lookups and yields once before answering, so concurrent lookups overlap.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    lookups: AtomicUsize,
}

impl CountingStore {
    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl DocumentStore for CountingStore {
    async fn insert(&self, collection: &str, doc: WireDocument) -> Result<WireValue, StoreError> {
        self.inner.insert(collection, doc).await
    }

    async fn replace(&self, collection: &str, id: &WireValue, doc: WireDocument) -> Result<(), StoreError> {
        self.inner.replace(collection, id, doc).await
    }

    async fn update(&self, collection: &str, id: &WireValue, changes: &[Change]) -> Result<(), StoreError> {
        self.inner.update(collection, id, changes).await
    }

    async fn find_one(&self, collection: &str, filter: &WireDocument) -> Result<Option<WireDocument>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.inner.find_one(collection, filter).await
    }

    async fn delete(&self, collection: &str, id: &WireValue) -> Result<(), StoreError> {
        self.inner.delete(collection, id).await
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Fixture {
    person: Arc<Schema>,
    post: Arc<Schema>,
    registry: SchemaRegistry,
    store: CountingStore,
}

impl Fixture {
    fn new() -> Self {
        init_logging();
        let person = Schema::builder("Person")
            .field(Field::string("name").required())
            .build()
            .unwrap();
        let post = Schema::builder("Post")
            .field(Field::string("title").required())
            .field(Field::reference("owner", "Person").required())
            .field(Field::reference("editor", "Person"))
            .field(Field::list("reviewers", FieldKind::Reference("Person".into())))
            .build()
            .unwrap();
        let registry = SchemaRegistry::builder()
            .register(&person)
            .register(&post)
            .build()
            .unwrap();
        Self {
            person,
            post,
            registry,
            store: CountingStore::default(),
        }
    }

    async fn person(&self, name: &str) -> ReferenceToken {
        let id = self
            .store
            .insert("person", wire_doc! { "name" => name })
            .await
            .unwrap();
        ReferenceToken::new("Person", id)
    }

    /// Saves a post owned by `owner` and loads it back, so its references are undecoded tokens.
    async fn post(&self, owner: ReferenceToken) -> Document {
        let mut post = Document::with_values(
            &self.post,
            [("title", Value::from("Hello")), ("owner", Value::from(owner))],
        )
        .unwrap();
        post.save(&self.store).await.unwrap();
        let mut loaded = Document::lazy(&self.post, post.id().unwrap()).unwrap();
        loaded.ensure_loaded(&self.store).await.unwrap();
        loaded
    }
}

#[tokio::test]
async fn loading_never_resolves_references() {
    let fx = Fixture::new();
    let ann = fx.person("Ann").await;
    let post = fx.post(ann.clone()).await;

    let before = fx.store.lookups();
    assert_eq!(post.reference("owner").unwrap(), Some(ann));
    assert!(post.references().is_empty());
    assert_eq!(fx.store.lookups(), before);
}

#[tokio::test]
async fn references_are_fetched_once_and_cached() {
    let fx = Fixture::new();
    let post = fx.post(fx.person("Ann").await).await;

    let before = fx.store.lookups();
    let owner = post
        .dereference("owner", &fx.registry, &fx.store)
        .await
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(owner.schema(), &fx.person));
    assert_eq!(owner.peek("name").unwrap(), Some("Ann".into()));
    assert_eq!(fx.store.lookups(), before + 1);

    let again = post
        .dereference("owner", &fx.registry, &fx.store)
        .await
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&owner, &again));
    assert_eq!(fx.store.lookups(), before + 1);
}

#[tokio::test]
async fn concurrent_dereferences_share_one_fetch() {
    let fx = Fixture::new();
    let post = fx.post(fx.person("Ann").await).await;

    let before = fx.store.lookups();
    let (a, b) = tokio::join!(
        post.dereference("owner", &fx.registry, &fx.store),
        post.dereference("owner", &fx.registry, &fx.store),
    );
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(fx.store.lookups(), before + 1);
}

#[tokio::test]
async fn reloading_forgets_resolved_references() {
    let fx = Fixture::new();
    let mut post = fx.post(fx.person("Ann").await).await;
    post.dereference("owner", &fx.registry, &fx.store).await.unwrap();

    post.reload(&fx.store).await.unwrap();
    assert!(post.references().is_empty());

    let before = fx.store.lookups();
    post.dereference("owner", &fx.registry, &fx.store).await.unwrap();
    post.dereference("owner", &fx.registry, &fx.store).await.unwrap();
    assert_eq!(fx.store.lookups(), before + 1);
}

#[tokio::test]
async fn invalidated_references_are_fetched_again() {
    let fx = Fixture::new();
    let ann = fx.person("Ann").await;
    let post = fx.post(ann.clone()).await;
    post.dereference("owner", &fx.registry, &fx.store).await.unwrap();

    fx.store
        .update("person", ann.id(), &[Change::set("name", "Annie")])
        .await
        .unwrap();
    assert!(post.invalidate_reference(&ann));
    let owner = post
        .dereference("owner", &fx.registry, &fx.store)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(owner.peek("name").unwrap(), Some("Annie".into()));
}

#[tokio::test]
async fn broken_references_depend_on_the_field() {
    let fx = Fixture::new();
    let ghost = ReferenceToken::new("Person", ulid::Ulid::nil());
    let mut post = fx.post(ghost.clone()).await;

    let err = post
        .dereference("owner", &fx.registry, &fx.store)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::BrokenReference {
            path: FieldPath::key("owner"),
            reference: ghost.clone(),
        }
    );

    let unset = post.dereference("editor", &fx.registry, &fx.store).await;
    assert!(unset.unwrap().is_none());

    post.set("editor", ghost).unwrap();
    let editor = post.dereference("editor", &fx.registry, &fx.store).await.unwrap();
    assert!(editor.is_none());
}

#[tokio::test]
async fn reference_lists_resolve_in_order() {
    let fx = Fixture::new();
    let ann = fx.person("Ann").await;
    let bob = fx.person("Bob").await;
    let mut post = fx.post(ann.clone()).await;
    post.push("reviewers", bob).unwrap();
    post.push("reviewers", ann).unwrap();

    let reviewers = post
        .dereference_all("reviewers", &fx.registry, &fx.store)
        .await
        .unwrap();
    let names: Vec<_> = reviewers
        .iter()
        .map(|r| r.peek("name").unwrap().unwrap())
        .collect();
    assert_eq!(names, [Value::from("Bob"), Value::from("Ann")]);

    let ghost = ReferenceToken::new("Person", ulid::Ulid::nil());
    post.push("reviewers", ghost.clone()).unwrap();
    let err = post
        .dereference_all("reviewers", &fx.registry, &fx.store)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::BrokenReference {
            path: FieldPath::key("reviewers").index(2),
            reference: ghost,
        }
    );

    assert!(post.dereference_all("owner", &fx.registry, &fx.store).await.is_err());
}
