//! Cross-resource reference resolution.
//!
//! String property values may embed placeholders of the form
//! `${resource.section.field}`:
//! - `${bucket.properties.bucket_name}` - a rendered property of `bucket`
//! - `${bucket.output.arn}` - a value reported by `bucket`'s plugin after deploy
//!
//! Resolution looks the path up in a [`ReferenceContext`] and substitutes the
//! stringified value in place, keeping any surrounding text.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::{ConfigError, ConfigResult};

// Non-greedy so several placeholders in one string are matched separately
static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{(.*?)\}").unwrap());

/// A parsed `${resource.section.field}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub resource: String,
    pub section: String,
    pub field: String,
}

impl Reference {
    /// Parse the inside of a placeholder. Exactly three non-empty segments.
    pub fn parse(placeholder: &str) -> ConfigResult<Self> {
        let parts: Vec<&str> = placeholder.split('.').collect();
        match parts.as_slice() {
            [resource, section, field]
                if !resource.is_empty() && !section.is_empty() && !field.is_empty() =>
            {
                Ok(Self {
                    resource: resource.to_string(),
                    section: section.to_string(),
                    field: field.to_string(),
                })
            }
            _ => Err(ConfigError::reference(
                placeholder,
                "expected the form <resource>.<section>.<field>",
            )),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.resource, self.section, self.field)
    }
}

/// Accumulated data of resources, keyed by resource name.
#[derive(Debug, Clone, Default)]
pub struct ReferenceContext {
    resources: HashMap<String, Value>,
}

impl ReferenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a resource's data.
    pub fn insert(&mut self, name: impl Into<String>, data: Value) {
        self.resources.insert(name.into(), data);
    }

    /// Attach an `output` section to a registered resource.
    pub fn set_output(&mut self, name: &str, output: Map<String, Value>) {
        if let Some(Value::Object(data)) = self.resources.get_mut(name) {
            data.insert("output".to_string(), Value::Object(output));
        }
    }

    fn lookup(&self, placeholder: &str) -> ConfigResult<String> {
        let reference = Reference::parse(placeholder)?;

        let data = self.resources.get(&reference.resource).ok_or_else(|| {
            ConfigError::reference(
                placeholder,
                format!("resource '{}' is not available", reference.resource),
            )
        })?;
        let section = data.get(&reference.section).ok_or_else(|| {
            ConfigError::reference(
                placeholder,
                format!(
                    "resource '{}' has no section '{}'",
                    reference.resource, reference.section
                ),
            )
        })?;
        let value = section.get(&reference.field).ok_or_else(|| {
            ConfigError::reference(
                placeholder,
                format!(
                    "section '{}' of resource '{}' has no field '{}'",
                    reference.section, reference.resource, reference.field
                ),
            )
        })?;

        Ok(stringify(value))
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve every placeholder in `value`, recursing through lists and mappings.
///
/// Returns a new value; on error nothing is substituted.
pub fn resolve(value: &Value, context: &ReferenceContext) -> ConfigResult<Value> {
    match value {
        Value::String(s) => Ok(Value::String(resolve_str(s, context)?)),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, context))
            .collect::<ConfigResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => resolve_map(map, context).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Resolve placeholders in the values of a mapping. Keys are left as written.
pub fn resolve_map(
    map: &Map<String, Value>,
    context: &ReferenceContext,
) -> ConfigResult<Map<String, Value>> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), resolve(value, context)?)))
        .collect()
}

/// Resolve all placeholders in one string.
pub fn resolve_str(input: &str, context: &ReferenceContext) -> ConfigResult<String> {
    let mut result = String::with_capacity(input.len());
    let mut last_end = 0;

    for caps in REFERENCE_REGEX.captures_iter(input) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        result.push_str(&input[last_end..whole.start()]);
        result.push_str(&context.lookup(inner.as_str())?);
        last_end = whole.end();
    }
    result.push_str(&input[last_end..]);

    Ok(result)
}

/// All placeholders found in string leaves of `value`, in document order.
pub fn find_references(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_references(value, &mut found);
    found
}

fn collect_references(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for caps in REFERENCE_REGEX.captures_iter(s) {
                found.push(caps[1].to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_references(item, found)),
        Value::Object(map) => map.values().for_each(|item| collect_references(item, found)),
        _ => {}
    }
}
