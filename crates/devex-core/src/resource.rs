//! Resource declarations and per-resource execution state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One declared unit of infrastructure, handled by the plugin bound to its `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique within one application.
    pub name: String,
    /// Plugin kind, e.g. `gcp/bucket` or `terraform/aws`.
    pub kind: String,
    /// Declared properties. May contain `${resource.section.field}` placeholders.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Names of resources that must be deployed first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// The resource as reference-resolution data: `{name, kind, properties}`.
    /// Deployed resources additionally carry an `output` section.
    pub fn to_context_value(&self) -> Value {
        let mut data = Map::new();
        data.insert("name".to_string(), Value::String(self.name.clone()));
        data.insert("kind".to_string(), Value::String(self.kind.clone()));
        data.insert(
            "properties".to_string(),
            Value::Object(self.properties.clone()),
        );
        Value::Object(data)
    }
}

/// Status of a resource within one deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceStatus {
    Pending,
    Deployed,
    Failed,
}

impl ResourceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResourceStatus::Deployed | ResourceStatus::Failed)
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Pending => write!(f, "PENDING"),
            ResourceStatus::Deployed => write!(f, "DEPLOYED"),
            ResourceStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Execution state recorded for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub status: ResourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
}

impl ResourceState {
    pub fn pending() -> Self {
        Self {
            status: ResourceStatus::Pending,
            reason: None,
            output: None,
        }
    }

    pub fn deployed(output: Option<Map<String, Value>>) -> Self {
        Self {
            status: ResourceStatus::Deployed,
            reason: Some("Resource deployed successfully".to_string()),
            output,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ResourceStatus::Failed,
            reason: Some(reason.into()),
            output: None,
        }
    }
}
