// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use docmap::{
    Document, DocumentStore, MemoryStore, ReferenceToken, SchemaRegistry, WireDocument,
    WireValue, changes, codec,
    schema::{Field, FieldKind, Schema},
    wire_doc,
};
use std::{hint::black_box, sync::Arc};
use tango_bench::{IntoBenchmarks, benchmark_fn, tango_benchmarks, tango_main};

const WIDTH: usize = 32;

fn address() -> Arc<Schema> {
    Schema::embedded("Address")
        .field(Field::string("city").required())
        .field(Field::string("street"))
        .build()
        .unwrap()
}

/// A schema with `WIDTH` scalar fields, one embedded document, a list and a reference.
fn wide() -> Arc<Schema> {
    let mut builder = Schema::builder("Wide");
    for i in 0..WIDTH {
        builder = if i % 2 == 0 {
            builder.field(Field::string(format!("s{i}")))
        } else {
            builder.field(Field::int(format!("i{i}")))
        };
    }
    builder
        .field(Field::embedded("address", &address()))
        .field(Field::list("tags", FieldKind::String))
        .field(Field::reference("owner", "Wide"))
        .build()
        .unwrap()
}

fn wide_wire() -> WireDocument {
    let mut doc = wire_doc! { "_id" => ulid::Ulid::nil() };
    for i in 0..WIDTH {
        if i % 2 == 0 {
            doc.insert(format!("s{i}"), WireValue::from(format!("value {i}")));
        } else {
            doc.insert(format!("i{i}"), WireValue::from(i as i64));
        }
    }
    doc.insert(
        "address".into(),
        wire_doc! { "city" => "Berlin", "street" => "Unter den Linden" }.into(),
    );
    doc.insert(
        "tags".into(),
        WireValue::array((0..64).map(|i| format!("tag {i}"))),
    );
    doc.insert(
        "owner".into(),
        ReferenceToken::new("Wide", ulid::Ulid::nil()).into(),
    );
    doc
}

fn document_benchmarks() -> impl IntoBenchmarks {
    let schema: &'static _ = Box::leak(Box::new(wide()));
    let wire: &'static _ = Box::leak(Box::new(wide_wire()));
    let loaded: &'static _ = Box::leak(Box::new(codec::decode(schema, wire.clone()).unwrap()));
    [
        benchmark_fn("document::new", move |b| {
            b.iter(move || Document::new(black_box(schema)))
        }),
        benchmark_fn("document::set", move |b| {
            b.iter(move || {
                let mut doc = Document::from_state(black_box(loaded).clone());
                doc.set("s16", "changed").unwrap();
                doc
            })
        }),
        benchmark_fn("document::get", move |b| {
            b.iter(move || {
                let mut doc = Document::from_state(black_box(loaded).clone());
                doc.get("tags").unwrap().is_some()
            })
        }),
    ]
}

fn codec_benchmarks() -> impl IntoBenchmarks {
    let schema: &'static _ = Box::leak(Box::new(wide()));
    let wire: &'static _ = Box::leak(Box::new(wide_wire()));
    let mut materialized = codec::decode(schema, wire.clone()).unwrap();
    materialized.materialize_all().unwrap();
    let materialized: &'static _ = Box::leak(Box::new(materialized));
    [
        benchmark_fn("codec::decode", move |b| {
            b.iter(move || codec::decode(schema, black_box(wire).clone()))
        }),
        benchmark_fn("codec::encode", move |b| {
            b.iter(move || codec::encode(black_box(materialized)))
        }),
    ]
}

fn change_benchmarks() -> impl IntoBenchmarks {
    let schema: &'static _ = Box::leak(Box::new(wide()));
    let loaded = codec::decode(schema, wide_wire()).unwrap();

    let mut one_scalar = loaded.clone();
    one_scalar.set("i7", 700).unwrap();
    let one_scalar: &'static _ = Box::leak(Box::new(one_scalar));

    let mut nested = loaded.clone();
    nested
        .embedded_mut("address")
        .unwrap()
        .set("street", "Friedrichstraße")
        .unwrap();
    let nested: &'static _ = Box::leak(Box::new(nested));

    let mut appended = loaded;
    appended.push("tags", "one more").unwrap();
    let appended: &'static _ = Box::leak(Box::new(appended));
    [
        benchmark_fn("changes::one_scalar", move |b| {
            b.iter(move || changes::compute(black_box(one_scalar)))
        }),
        benchmark_fn("changes::nested", move |b| {
            b.iter(move || changes::compute(black_box(nested)))
        }),
        benchmark_fn("changes::push", move |b| {
            b.iter(move || changes::compute(black_box(appended)))
        }),
    ]
}

fn reference_benchmarks() -> impl IntoBenchmarks {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let schema = wide();
    let registry = SchemaRegistry::builder().register(&schema).build().unwrap();
    let store = MemoryStore::new();
    let doc = runtime.block_on(async {
        store.insert("wide", wide_wire()).await.unwrap();
        let doc = Document::from_wire(&schema, wide_wire()).unwrap();
        doc.dereference("owner", &registry, &store).await.unwrap();
        doc
    });

    let runtime: &'static _ = Box::leak(Box::new(runtime));
    let registry: &'static _ = Box::leak(Box::new(registry));
    let store: &'static _ = Box::leak(Box::new(store));
    let doc: &'static Document = Box::leak(Box::new(doc));
    [benchmark_fn("reference::cached", move |b| {
        b.iter(move || {
            runtime
                .block_on(black_box(doc).dereference("owner", registry, store))
                .map(|owner| owner.is_some())
        })
    })]
}

tango_benchmarks!(
    document_benchmarks(),
    codec_benchmarks(),
    change_benchmarks(),
    reference_benchmarks()
);
tango_main!();
