// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Implementation of the quickcheck::Arbitrary trait for the wire types.
use crate::{
    timestamp::Timestamp,
    wire::{self, ReferenceToken, WireDocument, WireValue},
};
use quickcheck::{Arbitrary, Gen};
use ulid::Ulid;

/// Nested documents and arrays stop this many levels down.
const MAX_DEPTH: usize = 3;

impl Arbitrary for Timestamp {
    fn arbitrary(g: &mut Gen) -> Self {
        // Skew towards the epoch, where most real data lives.
        let span = Timestamp::MAX.as_millis() - Timestamp::MIN.as_millis() + 1;
        let millis = match *g.choose(&[0, 0, 1, 2]).unwrap() {
            0 => i64::from(i32::arbitrary(g)) * 1000,
            1 => i64::arbitrary(g).rem_euclid(span) + Timestamp::MIN.as_millis(),
            _ => 0,
        };
        Timestamp::from_millis(millis).expect("generated in range")
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        Box::new(
            self.as_millis()
                .shrink()
                .filter_map(|millis| Timestamp::from_millis(millis).ok()),
        )
    }
}

impl Arbitrary for ReferenceToken {
    fn arbitrary(g: &mut Gen) -> Self {
        let document = *g.choose(&["Person", "Company", "Post"]).unwrap();
        let id = match *g.choose(&["id", "int", "string"]).unwrap() {
            "id" => WireValue::Id(arbitrary_ulid(g)),
            "int" => WireValue::Int(i64::arbitrary(g)),
            _ => WireValue::String(String::arbitrary(g)),
        };
        ReferenceToken::new(document, id)
    }
}

impl Arbitrary for WireValue {
    fn arbitrary(g: &mut Gen) -> Self {
        arbitrary_value(g, 0)
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        match self {
            WireValue::Null => quickcheck::empty_shrinker(),
            WireValue::Bool(b) => Box::new(b.shrink().map(WireValue::Bool)),
            WireValue::Int(i) => Box::new(i.shrink().map(WireValue::Int)),
            WireValue::Float(f) => Box::new(f.shrink().map(WireValue::Float)),
            WireValue::String(s) => Box::new(s.shrink().map(WireValue::String)),
            WireValue::Binary(b) => Box::new(b.shrink().map(WireValue::Binary)),
            WireValue::DateTime(t) => Box::new(t.shrink().map(WireValue::DateTime)),
            WireValue::Array(items) => Box::new(items.shrink().map(WireValue::Array)),
            WireValue::Document(doc) => {
                // drop one key at a time
                let doc = doc.clone();
                Box::new((0..doc.len()).map(move |i| {
                    let mut smaller = doc.clone();
                    smaller.shift_remove_index(i);
                    WireValue::Document(smaller)
                }))
            }
            WireValue::Id(_) | WireValue::Reference(_) => Box::new(std::iter::once(WireValue::Null)),
        }
    }
}

fn arbitrary_ulid(g: &mut Gen) -> Ulid {
    Ulid::from_parts(u64::arbitrary(g) >> 16, u128::arbitrary(g))
}

fn arbitrary_value(g: &mut Gen, depth: usize) -> WireValue {
    let nested = depth < MAX_DEPTH;
    let choices: &[&str] = if nested {
        &[
            "null", "bool", "int", "float", "string", "binary", "date", "id", "ref", "array", "doc",
        ]
    } else {
        &["null", "bool", "int", "float", "string", "binary", "date", "id", "ref"]
    };
    match *g.choose(choices).unwrap() {
        "null" => WireValue::Null,
        "bool" => WireValue::Bool(bool::arbitrary(g)),
        "int" => WireValue::Int(i64::arbitrary(g)),
        "float" => WireValue::Float(f64::arbitrary(g)),
        "string" => WireValue::String(String::arbitrary(g)),
        "binary" => WireValue::Binary(Vec::arbitrary(g)),
        "date" => WireValue::DateTime(Timestamp::arbitrary(g)),
        "id" => WireValue::Id(arbitrary_ulid(g)),
        "ref" => WireValue::Reference(ReferenceToken::arbitrary(g)),
        "array" => {
            let len = usize::arbitrary(g) % 4;
            WireValue::Array((0..len).map(|_| arbitrary_value(g, depth + 1)).collect())
        }
        _ => WireValue::Document(arbitrary_document(g, depth + 1)),
    }
}

/// A document with up to four keys drawn from a small alphabet, so that keys collide often.
pub fn arbitrary_document(g: &mut Gen, depth: usize) -> WireDocument {
    let len = usize::arbitrary(g) % 5;
    let mut doc = wire::document_with_capacity(len);
    for _ in 0..len {
        let key = *g.choose(&["a", "b", "c", "d", "e", "f"]).unwrap();
        doc.insert(key.to_string(), arbitrary_value(g, depth));
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[quickcheck]
    fn generated_values_equal_their_clones(value: WireValue) -> bool {
        value == value.clone()
    }

    #[test]
    fn nesting_is_bounded() {
        fn depth(value: &WireValue) -> usize {
            match value {
                WireValue::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
                WireValue::Document(doc) => 1 + doc.values().map(depth).max().unwrap_or(0),
                _ => 0,
            }
        }
        let mut g = Gen::new(32);
        for _ in 0..200 {
            assert!(depth(&WireValue::arbitrary(&mut g)) <= MAX_DEPTH + 1);
        }
    }
}
