//! In-memory config tree
//!
//! The document is a JSON object with arbitrary nesting. Lookups walk the
//! tree one segment at a time by exact key match. Leaves may be any JSON
//! primitive but are surfaced as text:
//! - Strings: verbatim
//! - Numbers and booleans: their JSON text
//! - Null, arrays and objects: empty

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{Result, StoreError};

/// The on-disk document could not be turned into a tree.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ParseError(String);

/// Nested key/value mapping mirroring the on-disk document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTree {
    root: Map<String, Value>,
}

impl ConfigTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document. Empty or whitespace-only input is an empty tree.
    pub fn load(bytes: &[u8]) -> std::result::Result<Self, ParseError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }

        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| ParseError(e.to_string()))?;

        match value {
            Value::Object(root) => Ok(Self { root }),
            Value::Null => Ok(Self::new()),
            other => Err(ParseError(format!(
                "document root must be an object, found {}",
                kind(&other)
            ))),
        }
    }

    /// Whether the tree has no keys at all.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// The raw value at `path`, if every segment exists.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root.get(first.as_ref())?;
        for segment in rest {
            current = current.as_object()?.get(segment.as_ref())?;
        }
        Some(current)
    }

    /// Text at `path`, or an empty string if any segment is absent.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> String {
        self.lookup(path).map(leaf_text).unwrap_or_default()
    }

    /// Store `value` at `path`, creating intermediate objects.
    ///
    /// Anything already at `path` is replaced, as is any non-object value
    /// sitting where an intermediate object is needed.
    pub fn set<S: AsRef<str>>(&mut self, path: &[S], value: impl Into<Value>) -> Result<()> {
        validate_path(path)?;
        let Some((last, parents)) = path.split_last() else {
            return Err(StoreError::InvalidPath("path is empty".to_string()));
        };

        let mut map = &mut self.root;
        for segment in parents {
            let slot = map
                .entry(segment.as_ref().to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            map = slot
                .as_object_mut()
                .ok_or_else(|| StoreError::InvalidPath(display_path(path)))?;
        }

        map.insert(last.as_ref().to_string(), value.into());
        Ok(())
    }

    /// Remove the value or subtree at `path`. Returns whether it existed.
    pub fn remove<S: AsRef<str>>(&mut self, path: &[S]) -> Result<bool> {
        validate_path(path)?;
        let Some((last, parents)) = path.split_last() else {
            return Ok(false);
        };

        let mut map = &mut self.root;
        for segment in parents {
            match map.get_mut(segment.as_ref()).and_then(Value::as_object_mut) {
                Some(next) => map = next,
                None => return Ok(false),
            }
        }

        Ok(map.remove(last.as_ref()).is_some())
    }

    /// The whole tree as a JSON value.
    pub fn as_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    /// Complete pretty-printed document with a trailing newline.
    ///
    /// Keys come out sorted, so equal trees always serialize identically.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(&self.root)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if bytes.is_empty() && !self.is_empty() {
            return Err(StoreError::Serialization(
                "serializer produced no output for a non-empty tree".to_string(),
            ));
        }
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Split a dotted key such as `db.password` into path segments.
pub fn split_key(key: &str) -> Result<Vec<String>> {
    let segments: Vec<String> = key.split('.').map(str::to_string).collect();
    validate_path(&segments)?;
    Ok(segments)
}

/// Render a path back into dotted form for messages.
pub fn display_path<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(".")
}

fn validate_path<S: AsRef<str>>(path: &[S]) -> Result<()> {
    if path.is_empty() {
        return Err(StoreError::InvalidPath("path is empty".to_string()));
    }
    if path.iter().any(|s| s.as_ref().is_empty()) {
        return Err(StoreError::InvalidPath(format!(
            "empty segment in '{}'",
            display_path(path)
        )));
    }
    Ok(())
}

fn leaf_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
