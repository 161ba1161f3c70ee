//! Query key composition.
//!
//! A key is an ordered list of JSON tokens. Equality, hashing and display all
//! go through a canonical encoding with object keys sorted recursively, so a
//! filter maps to the same key no matter how its fields were ordered.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::Error;

/// Identifier of a cached result set, e.g. `["certs","list","websites"]`.
#[derive(Clone)]
pub struct QueryKey {
    tokens: Arc<[Value]>,
    canonical: Arc<str>,
}

impl QueryKey {
    pub fn new<I, V>(tokens: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::from_values(tokens.into_iter().map(|t| canonicalize(t.into())).collect())
    }

    fn from_values(tokens: Vec<Value>) -> Self {
        let canonical = Value::Array(tokens.clone()).to_string();
        Self { tokens: tokens.into(), canonical: canonical.into() }
    }

    /// Key with one more token appended.
    pub fn child(&self, token: impl Into<Value>) -> Self {
        let mut tokens = self.tokens.to_vec();
        tokens.push(canonicalize(token.into()));
        Self::from_values(tokens)
    }

    /// Cache key for a base key narrowed by `filter`.
    ///
    /// `None` leaves the key unchanged; `Some` appends the serialized filter,
    /// so distinct filter values never share an entry.
    pub fn with_filter<F: Serialize>(&self, filter: Option<&F>) -> Result<Self, Error> {
        match filter {
            None => Ok(self.clone()),
            Some(filter) => {
                let value = serde_json::to_value(filter).map_err(|e| Error::InvalidKey(e.to_string()))?;
                Ok(self.child(value))
            }
        }
    }

    pub fn tokens(&self) -> &[Value] {
        &self.tokens
    }

    /// First token, when it is a string.
    pub fn namespace(&self) -> Option<&str> {
        self.tokens.first().and_then(Value::as_str)
    }

    /// Token-wise prefix test.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.tokens.len() >= prefix.tokens.len() && self.tokens.iter().zip(prefix.tokens.iter()).all(|(a, b)| a == b)
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// SHA-256 of the canonical encoding, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        other => other,
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.canonical)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
