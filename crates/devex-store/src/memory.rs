//! In-process deployment store, for local runs and tests.

use async_trait::async_trait;
use devex_core::{
    Application, Configuration, Deployment, DeploymentState, DeploymentStore, DeploymentUpdate,
    RecordId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    applications: RwLock<HashMap<RecordId, Application>>,
    configurations: RwLock<HashMap<RecordId, Configuration>>,
    deployments: RwLock<BTreeMap<RecordId, Deployment>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_application(&self, application: Application) -> StoreResult<()> {
        write(&self.applications)?.insert(application.id, application);
        Ok(())
    }

    pub fn insert_configuration(&self, configuration: Configuration) -> StoreResult<()> {
        write(&self.configurations)?.insert(configuration.id, configuration);
        Ok(())
    }

    pub fn insert_deployment(&self, deployment: Deployment) -> StoreResult<()> {
        write(&self.deployments)?.insert(deployment.id, deployment);
        Ok(())
    }

    pub fn deployment(&self, id: RecordId) -> Option<Deployment> {
        self.deployments.read().ok()?.get(&id).cloned()
    }

    /// Simulate an outage: every trait call fails until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

fn write<T>(lock: &RwLock<T>) -> StoreResult<std::sync::RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| StoreError::Request("store lock poisoned".to_string()))
}

fn read<T>(lock: &RwLock<T>) -> StoreResult<std::sync::RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| StoreError::Request("store lock poisoned".to_string()))
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn list_deployments(&self, state: DeploymentState) -> devex_core::Result<Vec<Deployment>> {
        self.check_available()?;
        Ok(read(&self.deployments)?
            .values()
            .filter(|d| d.state == state)
            .cloned()
            .collect())
    }

    async fn get_application(&self, id: RecordId) -> devex_core::Result<Application> {
        self.check_available()?;
        read(&self.applications)?
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("application {}", id)).into())
    }

    async fn get_configuration(&self, id: RecordId) -> devex_core::Result<Configuration> {
        self.check_available()?;
        read(&self.configurations)?
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("configuration {}", id)).into())
    }

    async fn update_deployment(
        &self,
        id: RecordId,
        update: &DeploymentUpdate,
    ) -> devex_core::Result<()> {
        self.check_available()?;
        let mut deployments = write(&self.deployments)?;
        let deployment = deployments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("deployment {}", id)))?;
        deployment.state = update.state;
        if update.updated.is_some() {
            deployment.updated = update.updated;
        }
        Ok(())
    }
}
