//! Per-deployment resource status tracking.

use devex_core::{DeploymentState, Error, Resource, ResourceState, ResourceStatus, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Answer to "can this resource run now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Every dependency is deployed.
    Ready,
    /// At least one dependency is still pending.
    Blocked,
    /// A dependency failed (or does not exist); the resource must not run.
    DependencyFailed,
}

/// Status of every resource in one deployment run.
///
/// Transitions are monotonic: PENDING → DEPLOYED | FAILED. Leaving a terminal
/// state is rejected.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    states: BTreeMap<String, ResourceState>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_pending(&mut self, name: &str) -> Result<()> {
        self.transition(name, ResourceState::pending())
    }

    pub fn mark_deployed(&mut self, name: &str, output: Option<Map<String, Value>>) -> Result<()> {
        self.transition(name, ResourceState::deployed(output))
    }

    /// Plan-only runs finish resources without deploying them.
    pub fn mark_planned(&mut self, name: &str) -> Result<()> {
        self.transition(
            name,
            ResourceState {
                reason: Some("Resource planned successfully".to_string()),
                ..ResourceState::deployed(None)
            },
        )
    }

    pub fn mark_failed(&mut self, name: &str, reason: impl Into<String>) -> Result<()> {
        self.transition(name, ResourceState::failed(reason))
    }

    fn transition(&mut self, name: &str, next: ResourceState) -> Result<()> {
        if let Some(current) = self.states.get(name) {
            if current.status.is_terminal() {
                return Err(Error::Internal(format!(
                    "resource '{}' is already {} and cannot become {}",
                    name, current.status, next.status
                )));
            }
        }
        self.states.insert(name.to_string(), next);
        Ok(())
    }

    pub fn ready(&self, resource: &Resource) -> Readiness {
        let mut blocked = false;
        for dep in &resource.depends_on {
            match self.status(dep) {
                Some(ResourceStatus::Deployed) => {}
                Some(ResourceStatus::Pending) => blocked = true,
                Some(ResourceStatus::Failed) | None => return Readiness::DependencyFailed,
            }
        }
        if blocked {
            Readiness::Blocked
        } else {
            Readiness::Ready
        }
    }

    pub fn status(&self, name: &str) -> Option<ResourceStatus> {
        self.states.get(name).map(|s| s.status)
    }

    pub fn state(&self, name: &str) -> Option<&ResourceState> {
        self.states.get(name)
    }

    pub fn is_terminal(&self, name: &str) -> bool {
        self.status(name).is_some_and(|s| s.is_terminal())
    }

    /// Names of resources not yet in a terminal state.
    pub fn pending(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, s)| !s.status.is_terminal())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// FAILED if any resource failed, PENDING if any is unfinished, else DEPLOYED.
    pub fn aggregate(&self) -> DeploymentState {
        let statuses = || self.states.values().map(|s| s.status);
        if statuses().any(|s| s == ResourceStatus::Failed) {
            DeploymentState::Failed
        } else if statuses().any(|s| s == ResourceStatus::Pending) {
            DeploymentState::Pending
        } else {
            DeploymentState::Deployed
        }
    }

    pub fn into_states(self) -> BTreeMap<String, ResourceState> {
        self.states
    }
}
