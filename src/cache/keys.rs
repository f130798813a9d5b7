//! Content keys: deterministic fingerprints of an operation's parameters.
//!
//! Parameters live in a sorted map, so the order in which a caller supplies
//! them never changes the key. Raw payloads are folded into a SHA-256 digest
//! before they enter the map, which keeps every key at a fixed size no matter
//! how large the input image is.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key parameter `{name}` could not be serialized: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Named parameters that identify the output of an operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyParams {
    fields: BTreeMap<String, Value>,
}

impl KeyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), sorted(value.into()));
    }

    /// Fold a raw payload into the parameters by content hash.
    pub fn with_content(self, name: impl Into<String>, payload: &[u8]) -> Self {
        self.with(name, content_digest(payload))
    }

    /// Add a structured value. Nested maps are sorted like top-level fields.
    pub fn with_serialized<T: Serialize + ?Sized>(
        self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self, KeyError> {
        let name = name.into();
        let value = serde_json::to_value(value).map_err(|source| KeyError::Serialize {
            name: name.clone(),
            source,
        })?;
        Ok(self.with(name, value))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Canonical text form: `"name"=<json>` pairs in name order, joined by `&`.
    fn canonical(&self) -> String {
        self.fields
            .iter()
            .map(|(name, value)| format!("{}={value}", Value::String(name.clone())))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for KeyParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = KeyParams::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

/// Rebuild objects with their fields in name order at every depth.
fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(String, Value)> = map.into_iter().collect();
            fields.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                fields
                    .into_iter()
                    .map(|(name, value)| (name, sorted(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// Lowercase hex SHA-256 of a payload.
pub fn content_digest(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    hex::encode(&digest[..])
}

/// A cache lookup key: `<category>:<sha256 of canonical parameters>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey {
    category: String,
    key: String,
}

impl ContentKey {
    pub fn compute(category: &str, params: &KeyParams) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(category.as_bytes());
        hasher.update(b"\n");
        hasher.update(params.canonical().as_bytes());
        let digest = hasher.finalize();

        Self {
            category: category.to_string(),
            key: format!("{category}:{}", hex::encode(&digest[..])),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
