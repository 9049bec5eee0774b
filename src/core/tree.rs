//! Evaluated value trees.
//!
//! The evaluator hands back the unit's concrete JSON document. Consumers only
//! see three capabilities: path lookup, field iteration and decoding into a
//! typed record. Field order is the order of the evaluated document
//! (`serde_json` is built with `preserve_order`).

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Immutable handle over one unit's evaluated document.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedTree {
    root: Value,
}

impl EvaluatedTree {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Parse the JSON emitted by the evaluator.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json).map(Self::new)
    }

    pub fn value(&self) -> &Value {
        &self.root
    }

    /// Look up a nested field by labels. Absent or non-struct parents yield `None`.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        lookup(&self.root, path)
    }

    /// Iterate the (label, value) pairs of the struct at `path`.
    pub fn fields<S: AsRef<str>>(&self, path: &[S]) -> Option<Fields<'_>> {
        match self.lookup(path)? {
            Value::Object(map) => Some(Fields { inner: map.iter() }),
            _ => None,
        }
    }
}

/// Lazy iterator over the fields of one struct value.
pub struct Fields<'a> {
    inner: serde_json::map::Iter<'a>,
}

impl<'a> Iterator for Fields<'a> {
    type Item = (&'a str, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| (k.as_str(), v))
    }
}

/// Look up a nested field under any value.
pub fn lookup<'a, S: AsRef<str>>(value: &'a Value, path: &[S]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, label| current.as_object()?.get(label.as_ref()))
}

/// Decode a value of the tree into a typed record without copying it.
pub fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(value)
}

/// Split a dotted path (`Template.Resources.Alb`) into labels.
pub fn split_path(dotted: &str) -> Vec<String> {
    dotted
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
