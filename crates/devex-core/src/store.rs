//! External deployment store.
//!
//! The store owns applications, configurations and deployments. The engine and
//! daemon only ever consume it through this trait.

use async_trait::async_trait;

use crate::application::{Application, Configuration};
use crate::deployment::{Deployment, DeploymentState, DeploymentUpdate};
use crate::{RecordId, Result};

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// All deployments currently in `state`.
    async fn list_deployments(&self, state: DeploymentState) -> Result<Vec<Deployment>>;

    async fn get_application(&self, id: RecordId) -> Result<Application>;

    async fn get_configuration(&self, id: RecordId) -> Result<Configuration>;

    /// Persist the end-of-run fields of a deployment.
    async fn update_deployment(&self, id: RecordId, update: &DeploymentUpdate) -> Result<()>;
}
