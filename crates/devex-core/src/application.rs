//! Application and configuration records.
//!
//! An Application is a structured definition holding a list of resources and
//! free-form metadata. A Configuration carries the flat key/value overrides that
//! are templated into the definition before a deployment runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::resource::Resource;
use crate::{Error, RecordId, Result};

/// An application definition as stored by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Document with `resources` and `metadata` sections.
    pub definition: Value,
}

impl Application {
    pub fn new(name: impl Into<String>, definition: Value) -> Self {
        Self {
            id: RecordId::new(),
            name: name.into(),
            version: String::new(),
            definition,
        }
    }

    /// Extract the declared resources. Names must be unique.
    pub fn resources(&self) -> Result<Vec<Resource>> {
        let raw = self
            .definition
            .get("resources")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));

        let resources: Vec<Resource> = serde_json::from_value(raw).map_err(|e| {
            Error::InvalidInput(format!(
                "application '{}' has malformed resources: {}",
                self.name, e
            ))
        })?;

        let mut seen = HashSet::new();
        for resource in &resources {
            if !seen.insert(resource.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate resource name '{}' in application '{}'",
                    resource.name, self.name
                )));
            }
        }

        Ok(resources)
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.definition.get("metadata")
    }
}

/// A configuration for one application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub id: RecordId,
    pub application_id: RecordId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Document with a flat `config` mapping.
    pub definition: Value,
}

impl Configuration {
    pub fn new(application_id: RecordId, definition: Value) -> Self {
        Self {
            id: RecordId::new(),
            application_id,
            name: String::new(),
            version: String::new(),
            definition,
        }
    }

    /// The `config` mapping with scalar values stringified.
    ///
    /// A missing `config` section yields an empty map; nested values are rejected.
    pub fn values(&self) -> Result<BTreeMap<String, String>> {
        let Some(config) = self.definition.get("config") else {
            return Ok(BTreeMap::new());
        };

        let map = match config {
            Value::Object(map) => map,
            Value::Null => return Ok(BTreeMap::new()),
            _ => {
                return Err(Error::InvalidInput(
                    "configuration 'config' must be a mapping".to_string(),
                ));
            }
        };

        map.iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null => String::new(),
                    Value::Array(_) | Value::Object(_) => {
                        return Err(Error::InvalidInput(format!(
                            "configuration key '{}' must be a scalar",
                            key
                        )));
                    }
                };
                Ok((key.clone(), text))
            })
            .collect()
    }
}
