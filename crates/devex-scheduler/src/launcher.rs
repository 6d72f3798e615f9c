//! Production launcher: loads a deployment's records, runs it, persists the result.

use async_trait::async_trait;
use devex_core::{Deployment, DeploymentState, DeploymentStore, DeploymentUpdate, Result};
use std::sync::Arc;
use tracing::{error, info};

use crate::daemon::DeploymentLauncher;
use crate::engine::{DeploymentEngine, DeploymentReport};

pub struct StoreRunner {
    store: Arc<dyn DeploymentStore>,
    engine: DeploymentEngine,
}

impl StoreRunner {
    pub fn new(store: Arc<dyn DeploymentStore>, engine: DeploymentEngine) -> Self {
        Self { store, engine }
    }

    async fn execute(&self, deployment: &Deployment) -> Result<DeploymentReport> {
        let application = self.store.get_application(deployment.application_id).await?;
        let configuration = self
            .store
            .get_configuration(deployment.configuration_id)
            .await?;
        Ok(self
            .engine
            .run(deployment.id, &application, Some(&configuration), None)
            .await)
    }
}

#[async_trait]
impl DeploymentLauncher for StoreRunner {
    async fn launch(&self, deployment: Deployment) {
        let state = match self.execute(&deployment).await {
            Ok(report) => {
                for (name, resource) in &report.resources {
                    info!(deployment_id = %deployment.id, resource = %name, status = %resource.status, "Resource result");
                }
                report.state
            }
            Err(e) => {
                error!(deployment_id = %deployment.id, error = %e, "Deployment run failed");
                DeploymentState::Failed
            }
        };

        if let Err(e) = self
            .store
            .update_deployment(deployment.id, &DeploymentUpdate::state(state))
            .await
        {
            error!(deployment_id = %deployment.id, state = %state, error = %e, "Failed to persist deployment state");
        }
    }
}
