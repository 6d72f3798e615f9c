//! Scheduler daemon - polls the store for pending deployments and runs them.
//!
//! Every poll lists pending deployments and launches those not yet scheduled,
//! keeping fewer than `max_concurrent` runs in flight. Ids stay in the
//! scheduled set according to the [`DedupPolicy`], so the same deployment is
//! not launched twice while the store still reports it as pending.

use async_trait::async_trait;
use devex_config::{DedupPolicy, WorkerConfig};
use devex_core::{
    Deployment, DeploymentState, DeploymentStore, DeploymentUpdate, Error, RecordId, Result,
};
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Runs one deployment to completion, including persisting its final state.
///
/// Implementations handle their own errors; the daemon only tracks that the
/// run finished.
#[async_trait]
pub trait DeploymentLauncher: Send + Sync {
    async fn launch(&self, deployment: Deployment);
}

/// Scheduler settings, taken from the worker configuration.
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub poll_interval: Duration,
    /// Runs in flight never exceed this.
    pub max_concurrent: usize,
    pub dedup: DedupPolicy,
}

impl From<&WorkerConfig> for DaemonSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_concurrent: config.max_concurrent,
            dedup: config.dedup,
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub launched: Vec<RecordId>,
    /// Pending deployments skipped because the concurrency limit was reached.
    pub deferred: usize,
    pub evicted: usize,
}

type ScheduledSet = Arc<Mutex<HashSet<RecordId>>>;

pub struct SchedulerDaemon {
    store: Arc<dyn DeploymentStore>,
    launcher: Arc<dyn DeploymentLauncher>,
    settings: DaemonSettings,
    scheduled: ScheduledSet,
    /// Ids whose run has finished; candidates for eviction.
    finished: HashSet<RecordId>,
    tasks: JoinSet<RecordId>,
}

impl SchedulerDaemon {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        launcher: Arc<dyn DeploymentLauncher>,
        settings: DaemonSettings,
    ) -> Self {
        Self {
            store,
            launcher,
            settings,
            scheduled: Arc::default(),
            finished: HashSet::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Runs currently in flight.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_scheduled(&self, id: &RecordId) -> bool {
        is_scheduled(&self.scheduled, id)
    }

    /// Run one poll cycle: reap finished runs, list pending deployments and
    /// launch what fits under the concurrency limit.
    pub async fn poll_once(&mut self) -> Result<PollSummary> {
        self.reap();

        let pending = self.store.list_deployments(DeploymentState::Pending).await?;
        let mut summary = PollSummary {
            evicted: self.evict(&pending)?,
            ..PollSummary::default()
        };

        for deployment in pending {
            let id = deployment.id;
            if self.is_scheduled(&id) {
                debug!(deployment_id = %id, "Deployment already scheduled");
                continue;
            }
            if self.tasks.len() >= self.settings.max_concurrent {
                debug!(deployment_id = %id, max_concurrent = self.settings.max_concurrent, "Concurrency limit reached, deferring");
                summary.deferred += 1;
                continue;
            }

            self.lock_scheduled()?.insert(id);
            info!(deployment_id = %id, application_id = %deployment.application_id, "Launching deployment");
            let launcher = self.launcher.clone();
            let store = self.store.clone();
            self.tasks.spawn(async move {
                if AssertUnwindSafe(launcher.launch(deployment))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    error!(deployment_id = %id, "Deployment run panicked, marking failed");
                    let update = DeploymentUpdate::state(DeploymentState::Failed);
                    if let Err(e) = store.update_deployment(id, &update).await {
                        error!(deployment_id = %id, error = %e, "Failed to persist deployment state");
                    }
                }
                id
            });
            summary.launched.push(id);
        }

        Ok(summary)
    }

    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            match joined {
                Ok(id) => {
                    debug!(deployment_id = %id, "Deployment run finished");
                    self.mark_finished(id);
                }
                Err(e) => error!(error = %e, "Deployment task failed"),
            }
        }
    }

    /// Only tracked when finished ids can be evicted.
    fn mark_finished(&mut self, id: RecordId) {
        if self.settings.dedup == DedupPolicy::EvictTerminal {
            self.finished.insert(id);
        }
    }

    /// Drop finished ids the store no longer lists as pending.
    fn evict(&mut self, pending: &[Deployment]) -> Result<usize> {
        if self.settings.dedup == DedupPolicy::Never || self.finished.is_empty() {
            return Ok(0);
        }
        let still_pending: HashSet<RecordId> = pending.iter().map(|d| d.id).collect();
        let evictable: Vec<RecordId> = self
            .finished
            .iter()
            .filter(|id| !still_pending.contains(id))
            .copied()
            .collect();

        let mut scheduled = self
            .scheduled
            .lock()
            .map_err(|_| Error::Internal("scheduled set lock poisoned".to_string()))?;
        for id in &evictable {
            scheduled.remove(id);
            self.finished.remove(id);
            debug!(deployment_id = %id, "Evicted deployment from scheduled set");
        }
        Ok(evictable.len())
    }

    fn lock_scheduled(&self) -> Result<std::sync::MutexGuard<'_, HashSet<RecordId>>> {
        self.scheduled
            .lock()
            .map_err(|_| Error::Internal("scheduled set lock poisoned".to_string()))
    }

    /// Wait for every in-flight run.
    async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(id) => self.mark_finished(id),
                Err(e) => error!(error = %e, "Deployment task failed"),
            }
        }
    }

    /// Start the poll loop in the background.
    pub fn start(mut self) -> DaemonHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let scheduled = self.scheduled.clone();

        let task = tokio::spawn(async move {
            info!(
                poll_interval = ?self.settings.poll_interval,
                max_concurrent = self.settings.max_concurrent,
                dedup = ?self.settings.dedup,
                "Starting scheduler daemon"
            );

            loop {
                match self.poll_once().await {
                    Ok(summary) if !summary.launched.is_empty() || summary.deferred > 0 => {
                        debug!(launched = summary.launched.len(), deferred = summary.deferred, in_flight = self.in_flight(), "Poll complete");
                    }
                    Ok(_) => {}
                    // Store errors are transient; the next poll retries
                    Err(e) => warn!(error = %e, "Failed to poll deployments"),
                }

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }

            info!(in_flight = self.in_flight(), "Scheduler stopping, waiting for running deployments");
            self.drain().await;
            info!("Scheduler stopped");
        });

        DaemonHandle {
            shutdown: shutdown_tx,
            task,
            scheduled,
        }
    }
}

fn is_scheduled(scheduled: &ScheduledSet, id: &RecordId) -> bool {
    scheduled.lock().map(|s| s.contains(id)).unwrap_or(false)
}

/// Handle to a running daemon.
pub struct DaemonHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    scheduled: ScheduledSet,
}

impl DaemonHandle {
    pub fn is_scheduled(&self, id: &RecordId) -> bool {
        is_scheduled(&self.scheduled, id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Stop polling and wait for in-flight runs to finish.
    pub async fn stop(self) -> Result<()> {
        // The loop may already have exited; nothing to signal then
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| Error::Internal(format!("scheduler task failed: {}", e)))
    }
}
