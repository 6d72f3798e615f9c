//! Deployment records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RecordId;

/// Persisted state of a deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    #[default]
    Pending,
    Deployed,
    Failed,
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentState::Pending => write!(f, "pending"),
            DeploymentState::Deployed => write!(f, "deployed"),
            DeploymentState::Failed => write!(f, "failed"),
        }
    }
}

/// One execution attempt of an application against a configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: RecordId,
    pub application_id: RecordId,
    pub configuration_id: RecordId,
    #[serde(default)]
    pub configuration_version: String,
    #[serde(default)]
    pub state: DeploymentState,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn new(application_id: RecordId, configuration_id: RecordId) -> Self {
        Self {
            id: RecordId::new(),
            application_id,
            configuration_id,
            configuration_version: String::new(),
            state: DeploymentState::Pending,
            created: Some(Utc::now()),
            updated: None,
        }
    }
}

/// Fields written back to the store at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentUpdate {
    pub state: DeploymentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl DeploymentUpdate {
    pub fn state(state: DeploymentState) -> Self {
        Self {
            state,
            updated: Some(Utc::now()),
        }
    }
}
