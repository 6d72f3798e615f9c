//! Configuration templating.
//!
//! Configuration values are merged into an application definition by plain
//! string substitution over the serialized document: every literal `${key}` is
//! replaced by the configured value, then the text is parsed again. The
//! substitution is not scoped to particular fields, so values containing YAML
//! structure can break the document; that surfaces as a `Template` error.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::{ConfigError, ConfigResult};

/// Merge `config` into `definition`, returning the templated definition.
pub fn merge_configuration(
    definition: &Value,
    config: &BTreeMap<String, String>,
) -> ConfigResult<Value> {
    let mut text = serde_yaml::to_string(definition)?;
    for (key, value) in config {
        text = substitute(&text, key, value);
    }

    serde_yaml::from_str(&text).map_err(|e| {
        ConfigError::Template(format!("definition is invalid after merging configuration: {}", e))
    })
}

/// Replace every literal `${key}` in `input`.
pub fn substitute(input: &str, key: &str, value: &str) -> String {
    input.replace(&format!("${{{}}}", key), value)
}
