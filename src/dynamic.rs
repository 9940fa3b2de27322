//! Canonical dynamic-value type for schemaless JSON trees (§9 "Dynamic JSON").
//!
//! Tool arguments, filter values, and remote-tool payloads all traffic in
//! schemaless JSON. Rather than pass `serde_json::Value` around and let every
//! call site reinvent "what does a missing key mean", this module wraps it
//! with accessors that return an explicit [`Dynamic::Missing`] instead of
//! `None`/panicking, so a dotted-path lookup against absent metadata has one
//! unambiguous outcome everywhere in the crate.

use serde_json::Value;

/// A dynamic JSON-like value with an explicit "missing" state.
///
/// `Missing` is distinct from `Value(Value::Null)`: the former means "the key
/// was not present in the map", the latter means "the key was present and its
/// value was JSON `null`". The filter evaluator (§4.1) relies on this
/// distinction — "missing keys never match any comparison".
#[derive(Debug, Clone, PartialEq)]
pub enum Dynamic {
    /// The looked-up path did not resolve to any value.
    Missing,
    /// A resolved JSON value (including `null`).
    Value(Value),
}

impl Dynamic {
    /// Returns `true` if this is [`Dynamic::Missing`].
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Returns the inner [`Value`] if present.
    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Missing => None,
            Self::Value(v) => Some(v),
        }
    }

    /// Borrows the inner value as a string, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.value().and_then(Value::as_str)
    }

    /// Borrows the inner value as an f64, widening integers (`eq`/`ge`/etc.
    /// comparisons need numeric-widening per §4.1).
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.value().and_then(Value::as_f64)
    }

    /// Borrows the inner value as a JSON array, if it is one.
    #[must_use]
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        self.value().and_then(Value::as_array)
    }
}

/// Resolves a dotted path (`"a.b.c"`) against a JSON object.
///
/// Each segment must index into a JSON object; indexing through a non-object
/// (or past a missing key) yields [`Dynamic::Missing`] rather than an error —
/// consistent with §4.1's "missing keys never match any comparison".
#[must_use]
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Dynamic {
    let mut current = root;
    for segment in path.split('.') {
        match current.as_object().and_then(|map| map.get(segment)) {
            Some(next) => current = next,
            None => return Dynamic::Missing,
        }
    }
    Dynamic::Value(current.clone())
}
