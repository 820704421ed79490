//! Configuration schema.
//!
//! Options are open-ended: recognized names drive middleware, anything else
//! is kept verbatim in the snapshot. Both types wrap an ordered JSON map so a
//! patch deserializes from TOML or JSON alike.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Recognized option names.
pub mod keys {
    pub const BODY_PARSER: &str = "bodyParser";
    pub const CORS: &str = "cors";
    pub const HELMET: &str = "helmet";
    pub const STATIC: &str = "static";
    pub const LOGS: &str = "logs";
    pub const VIEWS: &str = "views";
    pub const PORT: &str = "port";

    /// The order in which side effects are applied.
    pub const APPLY_ORDER: [&str; 7] = [BODY_PARSER, CORS, HELMET, STATIC, LOGS, VIEWS, PORT];
}

/// A partial configuration: only the options supplied in one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigPatch {
    options: Map<String, Value>,
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set any option, recognized or not.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// `true`, `false` or a CORS options object.
    pub fn cors(self, value: impl Into<Value>) -> Self {
        self.set(keys::CORS, value)
    }

    /// `true`, `false` or a security header options object.
    pub fn helmet(self, value: impl Into<Value>) -> Self {
        self.set(keys::HELMET, value)
    }

    /// Serve files from `dir`, resolved against the application root.
    pub fn static_dir(self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_string_lossy().into_owned();
        self.set(keys::STATIC, dir)
    }

    /// Serve files from `dir` under the `mount` prefix.
    pub fn static_mounted(self, dir: impl AsRef<Path>, mount: &str) -> Self {
        let dir = dir.as_ref().to_string_lossy().into_owned();
        self.set(keys::STATIC, json!({ "dir": dir, "mount": mount }))
    }

    pub fn disable_static(self) -> Self {
        self.set(keys::STATIC, false)
    }

    /// `false` removes the parsers, an object replaces them, anything else
    /// makes sure they are installed.
    pub fn body_parser(self, value: impl Into<Value>) -> Self {
        self.set(keys::BODY_PARSER, value)
    }

    /// `true`, `false`, a format name or `{ "format": .. }`.
    pub fn logs(self, value: impl Into<Value>) -> Self {
        self.set(keys::LOGS, value)
    }

    pub fn views(self, engine: &str, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.set(keys::VIEWS, json!({ "engine": engine, "path": path }))
    }

    /// A number or numeric string; `false` or `null` clears it.
    pub fn port(self, value: impl Into<Value>) -> Self {
        self.set(keys::PORT, value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.options.iter()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

impl From<Map<String, Value>> for ConfigPatch {
    fn from(options: Map<String, Value>) -> Self {
        Self { options }
    }
}

/// Merged configuration of one application.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigSnapshot {
    values: Map<String, Value>,
}

impl ConfigSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// The stored port, if one is set.
    pub fn port(&self) -> Option<u16> {
        self.values
            .get(keys::PORT)
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn insert(&mut self, key: String, value: Value) {
        self.values.insert(key, value);
    }
}
