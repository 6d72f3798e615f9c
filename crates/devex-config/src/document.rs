//! YAML documents: application definitions, configurations, rendered resources.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use crate::ConfigResult;

/// Parse YAML text into a structured document. An empty document is `null`.
pub fn parse_document(text: &str) -> ConfigResult<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_yaml::from_str(text)?)
}

/// Read and parse a YAML file.
pub fn load_document(path: &Path) -> ConfigResult<Value> {
    let content = std::fs::read_to_string(path)?;
    parse_document(&content)
}

/// Serialize any value as YAML.
pub fn to_yaml<T: Serialize>(value: &T) -> ConfigResult<String> {
    Ok(serde_yaml::to_string(value)?)
}
