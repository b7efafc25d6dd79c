//! Tagged configuration values
//!
//! Environment entries in the settings file are free-form: the same map holds
//! integers (`num_containers: 3`), booleans (`swarm: true`) and strings
//! (`machine: qa-master`). Each entry is kept as a [`ConfigValue`] and read
//! back through an explicit coercion for the field being resolved.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single configuration value as written in the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ConfigValue {
    /// Render the value as a string, whatever its shape
    pub fn as_string(&self) -> String {
        self.to_string()
    }

    /// Integer view; strings are parsed, booleans are rejected
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::Str(s) => s.trim().parse().ok(),
            ConfigValue::Bool(_) => None,
        }
    }

    /// Boolean view; accepts the usual textual spellings
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::Int(0) => Some(false),
            ConfigValue::Int(1) => Some(true),
            ConfigValue::Int(_) => None,
            ConfigValue::Str(s) => match s.trim().to_lowercase().as_str() {
                "1" | "t" | "true" => Some(true),
                "0" | "f" | "false" => Some(false),
                _ => None,
            },
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Int(i) => write!(f, "{}", i),
            ConfigValue::Str(s) => f.write_str(s),
        }
    }
}

/// The key/value entries configured for one deploy environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentEntries(HashMap<String, ConfigValue>);

impl EnvironmentEntries {
    pub fn new(entries: HashMap<String, ConfigValue>) -> Self {
        Self(entries)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    /// String entry, empty when missing
    pub fn string(&self, key: &str) -> String {
        self.get(key).map(ConfigValue::as_string).unwrap_or_default()
    }

    /// Integer entry, `None` when missing or not numeric
    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ConfigValue::as_int)
    }

    /// Boolean entry, `false` when missing or not a boolean
    pub fn bool(&self, key: &str) -> bool {
        self.get(key).and_then(ConfigValue::as_bool).unwrap_or(false)
    }
}
