// (c) Copyright 2025 Helsing GmbH. All rights reserved.
/// Convenience macro for creating a [`WireDocument`](crate::wire::WireDocument).
///
/// Keys are anything `String: From` accepts, values anything that converts into a
/// [`WireValue`](crate::wire::WireValue). Key order is kept.
///
/// ```rust
/// # use docmap::{wire_doc, wire::WireValue};
/// let doc = wire_doc! {
///     "name" => "Ann",
///     "age" => 30,
///     "address" => wire_doc! { "city" => "Berlin" },
///     "tags" => WireValue::array(["a", "b"]),
/// };
/// assert_eq!(doc.len(), 4);
/// assert_eq!(doc.get_index(0).map(|(k, _)| k.as_str()), Some("name"));
/// ```
#[macro_export]
macro_rules! wire_doc {
    () => {
        $crate::wire::document_with_capacity(0)
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        {
            let mut doc = $crate::wire::document_with_capacity(0);
            $( doc.insert(::std::string::String::from($key), $crate::wire::WireValue::from($value)); )+
            doc
        }
    };
}

/// Convenience macro for creating a single [`WireValue`](crate::wire::WireValue).
///
/// `null`, `[..]` arrays and `{ "key" => .. }` documents nest; any other value must be a single
/// token tree, so wrap longer expressions in parentheses.
///
/// ```rust
/// # use docmap::{wire, wire::WireValue};
/// let value = wire!({
///     "name" => "Ann",
///     "nickname" => null,
///     "scores" => [1, 2, (1 + 2)],
///     "address" => { "city" => "Berlin" }
/// });
/// let doc = value.as_document().unwrap();
/// assert_eq!(doc["scores"], WireValue::array([1, 2, 3]));
/// assert!(doc["nickname"].is_null());
/// ```
#[macro_export]
macro_rules! wire {
    (null) => {
        $crate::wire::WireValue::Null
    };
    ([$($item:tt),* $(,)?]) => {
        $crate::wire::WireValue::Array(::std::vec![$($crate::wire!($item)),*])
    };
    ({}) => {
        $crate::wire::WireValue::Document($crate::wire_doc! {})
    };
    ({$($key:literal => $value:tt),+ $(,)?}) => {
        $crate::wire::WireValue::Document($crate::wire_doc! { $($key => $crate::wire!($value)),+ })
    };
    ($value:expr) => {
        $crate::wire::WireValue::from($value)
    };
}
