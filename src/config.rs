/// Worker key/value configuration consumed by the isolation layer
use crate::types::{IsolationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// String settings with typed accessors.
///
/// Recognized keys: `home`, `frameworks_home`, `hadoop_home`, `switch_user`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a flat JSON object of settings; non-string scalars are stringified
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(&content)
            .map_err(|e| {
                IsolationError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?;

        let mut conf = Self::new();
        for (key, value) in raw {
            match value {
                serde_json::Value::String(s) => conf.set(&key, &s),
                serde_json::Value::Bool(_) | serde_json::Value::Number(_) => {
                    conf.set(&key, &value.to_string())
                }
                other => {
                    return Err(IsolationError::Config(format!(
                        "Setting {} must be a scalar, got {}",
                        key, other
                    )))
                }
            }
        }
        Ok(conf)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Accepts `true/false`, `1/0`, `yes/no`; anything else yields `default`
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" || v == "1" || v == "yes" => true,
            Some(v) if v == "false" || v == "0" || v == "no" => false,
            _ => default,
        }
    }
}
