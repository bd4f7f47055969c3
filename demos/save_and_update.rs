// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! This example walks a blog post through its life: created, saved, edited in place, saved
//! again with a minimal update, and finally linked to its author through a reference.
//! Run it with `RUST_LOG=docmap=debug` to see what is sent to the store.
use docmap::{
    Document, DocumentStore, MemoryStore, ReferenceToken, SchemaRegistry, Value,
    schema::{Field, FieldKind, Schema},
};
use std::error::Error;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // THE DATA MODEL
    // An author is a top-level document. A post embeds its metadata and refers to its author.
    let author = Schema::builder("Author")
        .field(Field::string("name").required())
        .build()?;
    let meta = Schema::embedded("Meta")
        .field(Field::string("slug").required())
        .field(Field::int("views").default(0))
        .build()?;
    let post = Schema::builder("Post")
        .field(Field::string("title").required())
        .field(Field::embedded("meta", &meta))
        .field(Field::list("tags", FieldKind::String).default(Value::list(Vec::<Value>::new())))
        .field(Field::reference("author", "Author"))
        .build()?;
    let registry = SchemaRegistry::builder()
        .register(&author)
        .register(&post)
        .build()?;
    let store = MemoryStore::new();

    // A NEW DOCUMENT
    println!("1. Create a post and save it.");
    let mut hello = Document::with_values(&post, [("title", "Hello, world")])?;
    let mut slug = docmap::InstanceState::new(meta)?;
    slug.set("slug", "hello-world")?;
    hello.set("meta", slug)?;
    // A new document is written whole.
    println!("   pending: {}", hello.changes()?);
    hello.save(&store).await?;
    println!("   saved with id {}", hello.id().ok_or("no id after save")?);

    // IN-PLACE EDITS
    println!("2. Edit a nested field and append a tag.");
    hello.embedded_mut("meta")?.set("views", 1)?;
    hello.push("tags", "intro")?;
    // Only the changed paths are sent.
    println!("   pending: {}", hello.changes()?.to_string().replace('\n', "; "));
    hello.save(&store).await?;
    assert!(!hello.is_dirty());

    // REFERENCES
    println!("3. Link the post to its author.");
    let ann = store
        .insert("author", docmap::wire_doc! { "name" => "Ann" })
        .await?;
    hello.set("author", ReferenceToken::new("Author", ann))?;
    hello.save(&store).await?;

    let mut loaded = Document::lazy(&post, hello.id().ok_or("no id after save")?)?;
    loaded.ensure_loaded(&store).await?;
    // The reference is fetched on first use and cached afterwards.
    if let Some(author) = loaded.dereference("author", &registry, &store).await? {
        println!("   written by {:?}", author.peek("name")?);
    }
    println!("   stored: {:?}", loaded.to_wire()?);
    Ok(())
}
