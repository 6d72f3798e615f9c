//! Deployment engine - deploys an application's resources in dependency order.
//!
//! Resources without a dependency relationship run concurrently, each as its
//! own task. The engine only re-evaluates readiness when a task finishes, so a
//! resource starts as soon as its last dependency is deployed, whatever order
//! the resources were declared in.

use devex_config::references::{ReferenceContext, resolve_map};
use devex_config::template::merge_configuration;
use devex_config::WorkerConfig;
use devex_core::plugin::{LogLine, PluginExecutor};
use devex_core::{
    Application, Configuration, DeploymentState, Error, RecordId, Resource, ResourceState,
};
use devex_executor::{PluginRegistry, PluginRunner};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::RunResult;
use crate::graph;
use crate::tracker::{DependencyTracker, Readiness};

const REASON_DEPENDENCY_FAILED: &str = "dependent resource failed to deploy";
const REASON_CYCLE: &str = "dependency cycle detected";

/// Lifecycle of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnginePhase {
    Initializing,
    Running,
    /// Every resource reached a terminal state.
    Completed,
    /// The run was aborted by a deployment-level error.
    Failed,
}

/// Event emitted during a deployment run.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PhaseChanged { phase: EnginePhase },
    ResourceStarted { resource: String },
    ResourceLog { resource: String, line: LogLine },
    ResourceCompleted { resource: String, state: ResourceState },
    DeploymentCompleted { state: DeploymentState },
}

/// Result of a deployment run.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub deployment_id: RecordId,
    pub state: DeploymentState,
    pub phase: EnginePhase,
    pub resources: BTreeMap<String, ResourceState>,
    /// Set when the run was aborted before or while scheduling resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeploymentReport {
    pub fn is_success(&self) -> bool {
        self.state == DeploymentState::Deployed
    }
}

enum Outcome {
    Planned,
    Deployed(Option<Map<String, Value>>),
}

/// Everything a finished resource task hands back to the engine loop.
struct Finished {
    name: String,
    rendered: Resource,
    result: Result<Outcome, String>,
}

/// Runs deployments against a plugin executor.
#[derive(Clone)]
pub struct DeploymentEngine {
    executor: Arc<dyn PluginExecutor>,
    config: Arc<WorkerConfig>,
    registry: Option<Arc<PluginRegistry>>,
    plan_only: bool,
}

impl DeploymentEngine {
    pub fn new(executor: Arc<dyn PluginExecutor>, config: Arc<WorkerConfig>) -> Self {
        Self {
            executor,
            config,
            registry: None,
            plan_only: false,
        }
    }

    /// Use a fixed registry instead of resolving plugins from the plugin directory.
    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Run only the `plan` stage of every resource.
    pub fn plan_only(mut self, plan_only: bool) -> Self {
        self.plan_only = plan_only;
        self
    }

    /// Run a deployment in the background, returning a channel of events and
    /// a handle to the final report.
    pub fn execute(
        &self,
        deployment_id: RecordId,
        application: Application,
        configuration: Option<Configuration>,
    ) -> (
        mpsc::Receiver<EngineEvent>,
        tokio::task::JoinHandle<DeploymentReport>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let engine = self.clone();

        let handle = tokio::spawn(async move {
            engine
                .run(deployment_id, &application, configuration.as_ref(), Some(tx))
                .await
        });

        (rx, handle)
    }

    /// Run a deployment to completion.
    ///
    /// Never fails: deployment-level errors are reported as a FAILED report
    /// with `error` set.
    pub async fn run(
        &self,
        deployment_id: RecordId,
        application: &Application,
        configuration: Option<&Configuration>,
        events: Option<mpsc::Sender<EngineEvent>>,
    ) -> DeploymentReport {
        info!(deployment_id = %deployment_id, application = %application.name, plan_only = self.plan_only, "Starting deployment");

        emit(
            &events,
            EngineEvent::PhaseChanged {
                phase: EnginePhase::Initializing,
            },
        )
        .await;
        let mut tracker = DependencyTracker::new();
        let result = self
            .run_inner(deployment_id, application, configuration, &mut tracker, &events)
            .await;

        let (state, phase, error) = match result {
            Ok(()) => (tracker.aggregate(), EnginePhase::Completed, None),
            Err(e) => {
                error!(deployment_id = %deployment_id, error = %e, "Deployment aborted");
                (DeploymentState::Failed, EnginePhase::Failed, Some(e.to_string()))
            }
        };

        info!(deployment_id = %deployment_id, state = %state, "Deployment finished");
        emit(&events, EngineEvent::PhaseChanged { phase }).await;
        emit(&events, EngineEvent::DeploymentCompleted { state }).await;

        DeploymentReport {
            deployment_id,
            state,
            phase,
            resources: tracker.into_states(),
            error,
        }
    }

    async fn run_inner(
        &self,
        deployment_id: RecordId,
        application: &Application,
        configuration: Option<&Configuration>,
        tracker: &mut DependencyTracker,
        events: &Option<mpsc::Sender<EngineEvent>>,
    ) -> RunResult<()> {
        let resources = self.load_resources(application, configuration)?;
        let registry = match &self.registry {
            Some(registry) => registry.clone(),
            None => Arc::new(PluginRegistry::resolve(
                &self.config,
                resources.iter().map(|r| r.kind.as_str()),
            )?),
        };

        for resource in &resources {
            tracker.mark_pending(&resource.name)?;
        }

        for (name, dep) in graph::unknown_dependencies(&resources) {
            let reason = format!("unknown dependency '{}'", dep);
            fail(tracker, events, &name, reason).await?;
        }
        let cycle = graph::cycle_members(&resources);
        if !cycle.is_empty() {
            let err = Error::DependencyCycle(cycle.iter().cloned().collect());
            warn!(deployment_id = %deployment_id, error = %err, "Resources will not be deployed");
        }
        for name in cycle {
            fail(tracker, events, &name, REASON_CYCLE).await?;
        }

        emit(
            events,
            EngineEvent::PhaseChanged {
                phase: EnginePhase::Running,
            },
        )
        .await;
        // Plugins run inside their scratch directory, so it must not be relative
        let scratch_root = std::path::absolute(self.config.work_dir.join(deployment_id.to_string()))
            .map_err(Error::from)?;
        let mut context = ReferenceContext::new();
        let mut running: HashSet<String> = HashSet::new();
        let mut tasks: JoinSet<Finished> = JoinSet::new();

        loop {
            // Failures can unblock further failures in the same pass
            let mut changed = true;
            while changed {
                changed = false;
                for (index, resource) in resources.iter().enumerate() {
                    if tracker.is_terminal(&resource.name) || running.contains(&resource.name) {
                        continue;
                    }
                    match tracker.ready(resource) {
                        Readiness::Blocked => {}
                        Readiness::DependencyFailed => {
                            fail(tracker, events, &resource.name, REASON_DEPENDENCY_FAILED)
                                .await?;
                            changed = true;
                        }
                        Readiness::Ready => {
                            let scratch = scratch_dir(&scratch_root, index, &resource.name);
                            match self.start(resource, &registry, &context, scratch, events) {
                                Ok(task) => {
                                    emit(
                                        events,
                                        EngineEvent::ResourceStarted {
                                            resource: resource.name.clone(),
                                        },
                                    )
                                    .await;
                                    running.insert(resource.name.clone());
                                    tasks.spawn(task);
                                }
                                Err(reason) => {
                                    fail(tracker, events, &resource.name, reason).await?;
                                    changed = true;
                                }
                            }
                        }
                    }
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let finished = joined.map_err(|e| Error::Internal(format!("resource task failed: {}", e)))?;
            running.remove(&finished.name);

            match finished.result {
                Ok(outcome) => {
                    context.insert(finished.name.clone(), finished.rendered.to_context_value());
                    match outcome {
                        Outcome::Planned => tracker.mark_planned(&finished.name)?,
                        Outcome::Deployed(output) => {
                            tracker.mark_deployed(&finished.name, output.clone())?;
                            if let Some(output) = output {
                                context.set_output(&finished.name, output);
                            }
                        }
                    }
                    info!(deployment_id = %deployment_id, resource = %finished.name, "Resource deployed");
                    completed(tracker, events, &finished.name).await;
                }
                Err(reason) => {
                    fail(tracker, events, &finished.name, reason).await?;
                }
            }
        }

        // Nothing runs and nothing can start: whatever is left waits on itself
        for name in tracker.pending() {
            fail(tracker, events, &name, REASON_CYCLE).await?;
        }

        Ok(())
    }

    /// Merge configuration into the definition, then extract resources.
    fn load_resources(
        &self,
        application: &Application,
        configuration: Option<&Configuration>,
    ) -> RunResult<Vec<Resource>> {
        let definition = match configuration {
            Some(configuration) => {
                merge_configuration(&application.definition, &configuration.values()?)?
            }
            None => application.definition.clone(),
        };
        let merged = Application {
            definition,
            ..application.clone()
        };
        Ok(merged.resources()?)
    }

    /// Render a ready resource and build its task. `Err` is the failure reason
    /// when the resource cannot run at all.
    fn start(
        &self,
        resource: &Resource,
        registry: &PluginRegistry,
        context: &ReferenceContext,
        scratch: PathBuf,
        events: &Option<mpsc::Sender<EngineEvent>>,
    ) -> Result<BoxFuture<'static, Finished>, String> {
        let binding = registry
            .get(&resource.kind)
            .cloned()
            .ok_or_else(|| {
                Error::PluginBinding {
                    kind: resource.kind.clone(),
                }
                .failure_reason()
            })?;

        let properties = resolve_map(&resource.properties, context).map_err(|e| e.to_string())?;
        let rendered = Resource {
            properties,
            ..resource.clone()
        };

        let runner = PluginRunner::new(
            self.executor.clone(),
            binding,
            resource.name.clone(),
            scratch,
        );
        let plan_only = self.plan_only;
        let events = events.clone();
        let name = resource.name.clone();

        Ok(async move {
            let (log_tx, log_rx) = match events {
                Some(_) => {
                    let (tx, rx) = mpsc::channel(100);
                    (Some(tx), Some(rx))
                }
                None => (None, None),
            };

            let stages = run_stages(runner, rendered.clone(), plan_only, log_tx);
            let forward = forward_logs(name.clone(), log_rx, events);
            // The stages run in their own task so a panicking plugin
            // integration fails one resource, not the whole run
            let (result, ()) = tokio::join!(
                async {
                    tokio::spawn(stages)
                        .await
                        .unwrap_or_else(|e| Err(format!("resource task panicked: {}", e)))
                },
                forward
            );

            Finished {
                name,
                rendered,
                result,
            }
        }
        .boxed())
    }
}

async fn run_stages(
    runner: PluginRunner,
    rendered: Resource,
    plan_only: bool,
    sink: Option<mpsc::Sender<LogLine>>,
) -> Result<Outcome, String> {
    stage_sequence(&runner, &rendered, plan_only, sink.as_ref())
        .await
        .map_err(|e| {
            warn!(resource = %rendered.name, error = %e, "Resource failed");
            e.failure_reason()
        })
}

async fn stage_sequence(
    runner: &PluginRunner,
    rendered: &Resource,
    plan_only: bool,
    sink: Option<&mpsc::Sender<LogLine>>,
) -> devex_core::Result<Outcome> {
    runner.prepare(rendered).await?;
    runner.plan(sink).await?;
    if plan_only {
        return Ok(Outcome::Planned);
    }
    runner.deploy(sink).await?;
    Ok(Outcome::Deployed(runner.output().await?))
}

async fn forward_logs(
    resource: String,
    logs: Option<mpsc::Receiver<LogLine>>,
    events: Option<mpsc::Sender<EngineEvent>>,
) {
    let (Some(mut logs), Some(events)) = (logs, events) else {
        return;
    };
    while let Some(line) = logs.recv().await {
        let _ = events
            .send(EngineEvent::ResourceLog {
                resource: resource.clone(),
                line,
            })
            .await;
    }
}

/// Scratch directory for one resource.
///
/// Names are reduced to a safe path segment. A name that had to be rewritten
/// gets its declaration index appended after a `~`, which never survives
/// sanitizing, so distinct resources never share a directory.
fn scratch_dir(root: &std::path::Path, index: usize, resource: &str) -> PathBuf {
    let mut segment: String = resource
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if segment.chars().all(|c| c == '.') {
        segment.insert(0, '_');
    }
    if segment != resource {
        segment = format!("{}~{}", segment, index);
    }
    root.join(segment)
}

async fn emit(events: &Option<mpsc::Sender<EngineEvent>>, event: EngineEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

async fn fail(
    tracker: &mut DependencyTracker,
    events: &Option<mpsc::Sender<EngineEvent>>,
    name: &str,
    reason: impl Into<String>,
) -> devex_core::Result<()> {
    // A resource with several unknown dependencies is reported once
    if tracker.is_terminal(name) {
        return Ok(());
    }
    let reason = reason.into();
    warn!(resource = %name, reason = %reason, "Resource failed");
    tracker.mark_failed(name, reason)?;
    completed(tracker, events, name).await;
    Ok(())
}

async fn completed(
    tracker: &DependencyTracker,
    events: &Option<mpsc::Sender<EngineEvent>>,
    name: &str,
) {
    if let Some(state) = tracker.state(name) {
        emit(
            events,
            EngineEvent::ResourceCompleted {
                resource: name.to_string(),
                state: state.clone(),
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use devex_core::plugin::{
        LogStream, PluginBinding, PluginExit, PluginHandle, PluginSpec, PluginStage,
    };
    use devex_core::{ResourceStatus, Result};
    use futures::stream::{self, BoxStream, StreamExt};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Executor that records invocations instead of running processes.
    #[derive(Default)]
    struct FakeExecutor {
        calls: Mutex<Vec<(String, PluginStage)>>,
        specs: Mutex<HashMap<RecordId, PluginSpec>>,
        rendered: Mutex<HashMap<String, String>>,
        failing: HashSet<String>,
        outputs: HashMap<String, Vec<String>>,
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeExecutor {
        fn calls_for(&self, resource: &str) -> Vec<PluginStage> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(r, _)| r == resource)
                .map(|(_, s)| *s)
                .collect()
        }

        fn position(&self, resource: &str, stage: PluginStage) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .position(|(r, s)| r == resource && *s == stage)
                .unwrap()
        }
    }

    #[async_trait]
    impl PluginExecutor for FakeExecutor {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn spawn(&self, spec: PluginSpec) -> Result<PluginHandle> {
            self.calls
                .lock()
                .unwrap()
                .push((spec.resource.clone(), spec.stage));
            let rendered = std::fs::read_to_string(&spec.resource_file).unwrap();
            self.rendered
                .lock()
                .unwrap()
                .insert(spec.resource.clone(), rendered);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);

            let handle = PluginHandle {
                id: spec.id,
                resource: spec.resource.clone(),
                stage: spec.stage,
                executor_id: "fake".to_string(),
                executor_name: "fake".to_string(),
            };
            self.specs.lock().unwrap().insert(spec.id, spec);
            Ok(handle)
        }

        async fn logs(&self, handle: &PluginHandle) -> Result<BoxStream<'static, LogLine>> {
            let line = LogLine::new(
                LogStream::Stdout,
                format!("{} {}", handle.stage, handle.resource),
            );
            Ok(stream::iter(vec![line]).boxed())
        }

        async fn wait(&self, handle: &PluginHandle) -> Result<PluginExit> {
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if handle.stage == PluginStage::Deploy && self.failing.contains(&handle.resource) {
                return Err(Error::plugin_execution(
                    "exit code 1",
                    vec!["quota exceeded".to_string()],
                ));
            }
            let stdout = match handle.stage {
                PluginStage::Output => self
                    .outputs
                    .get(&handle.resource)
                    .cloned()
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            Ok(PluginExit {
                exit_code: Some(0),
                started_at: chrono::Utc::now(),
                finished_at: chrono::Utc::now(),
                output: stdout.clone(),
                stdout,
            })
        }
    }

    struct Harness {
        executor: Arc<FakeExecutor>,
        engine: DeploymentEngine,
        _work: tempfile::TempDir,
    }

    fn harness(executor: FakeExecutor, kinds: &[&str]) -> Harness {
        let work = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            work_dir: work.path().to_path_buf(),
            plugin_dir: work.path().join("no-plugins"),
            ..WorkerConfig::default()
        };
        let mut registry = PluginRegistry::new();
        for kind in kinds {
            registry.register(
                PluginBinding::new(*kind, format!("/plugins/{}/plugin.sh", kind))
                    .with_capability(PluginStage::Output),
            );
        }
        let executor = Arc::new(executor);
        let engine = DeploymentEngine::new(executor.clone(), Arc::new(config))
            .with_registry(registry);
        Harness {
            executor,
            engine,
            _work: work,
        }
    }

    fn application(resources: Value) -> Application {
        Application::new("web", json!({ "metadata": {"name": "web"}, "resources": resources }))
    }

    async fn run(harness: &Harness, app: Application) -> DeploymentReport {
        harness.engine.run(RecordId::new(), &app, None, None).await
    }

    fn status(report: &DeploymentReport, name: &str) -> ResourceStatus {
        report.resources[name].status
    }

    fn reason<'a>(report: &'a DeploymentReport, name: &str) -> &'a str {
        report.resources[name].reason.as_deref().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_independent_resources_run_concurrently() {
        let h = harness(
            FakeExecutor {
                delay: Duration::from_millis(100),
                ..Default::default()
            },
            &["k"],
        );
        let app = application(json!([
            {"name": "a", "kind": "k"},
            {"name": "b", "kind": "k"},
            {"name": "c", "kind": "k"}
        ]));

        let report = run(&h, app).await;

        assert_eq!(report.state, DeploymentState::Deployed);
        assert!(h.executor.max_active.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_dependency_order_and_output_reference() {
        let h = harness(
            FakeExecutor {
                outputs: HashMap::from([("bucket".to_string(), vec!["name: x".to_string()])]),
                ..Default::default()
            },
            &["storage", "service"],
        );
        // Declared before its dependency on purpose
        let app = application(json!([
            {
                "name": "api",
                "kind": "service",
                "properties": {"bucket_arn": "arn:${bucket.output.name}"},
                "depends_on": ["bucket"]
            },
            {"name": "bucket", "kind": "storage", "properties": {"bucket_name": "assets"}}
        ]));

        let report = run(&h, app).await;

        assert!(report.is_success());
        assert!(
            h.executor.position("bucket", PluginStage::Output)
                < h.executor.position("api", PluginStage::Plan)
        );
        let rendered = h.executor.rendered.lock().unwrap()["api"].clone();
        assert!(rendered.contains("arn:x"));
        assert_eq!(
            report.resources["bucket"].output.as_ref().unwrap()["name"],
            json!("x")
        );
    }

    #[tokio::test]
    async fn test_failure_propagates_to_dependents() {
        let h = harness(
            FakeExecutor {
                failing: HashSet::from(["db".to_string()]),
                ..Default::default()
            },
            &["k"],
        );
        let app = application(json!([
            {"name": "db", "kind": "k"},
            {"name": "api", "kind": "k", "depends_on": ["db"]},
            {"name": "web", "kind": "k", "depends_on": ["api"]},
            {"name": "cdn", "kind": "k"}
        ]));

        let report = run(&h, app).await;

        assert_eq!(report.state, DeploymentState::Failed);
        assert_eq!(report.phase, EnginePhase::Completed);
        assert_eq!(status(&report, "db"), ResourceStatus::Failed);
        assert!(reason(&report, "db").contains("quota exceeded"));
        assert_eq!(reason(&report, "api"), REASON_DEPENDENCY_FAILED);
        assert_eq!(reason(&report, "web"), REASON_DEPENDENCY_FAILED);
        assert_eq!(status(&report, "cdn"), ResourceStatus::Deployed);
        assert!(h.executor.calls_for("api").is_empty());
        assert!(h.executor.calls_for("web").is_empty());
    }

    #[tokio::test]
    async fn test_cycle_fails_members_without_invoking_plugins() {
        let h = harness(FakeExecutor::default(), &["k"]);
        let app = application(json!([
            {"name": "a", "kind": "k", "depends_on": ["b"]},
            {"name": "b", "kind": "k", "depends_on": ["a"]},
            {"name": "c", "kind": "k", "depends_on": ["a"]},
            {"name": "d", "kind": "k"}
        ]));

        let report = run(&h, app).await;

        assert_eq!(reason(&report, "a"), REASON_CYCLE);
        assert_eq!(reason(&report, "b"), REASON_CYCLE);
        assert_eq!(reason(&report, "c"), REASON_DEPENDENCY_FAILED);
        assert_eq!(status(&report, "d"), ResourceStatus::Deployed);
        assert!(h.executor.calls_for("a").is_empty());
        assert!(h.executor.calls_for("b").is_empty());
        assert_eq!(report.state, DeploymentState::Failed);
    }

    #[tokio::test]
    async fn test_missing_plugin_fails_resource_only() {
        let h = harness(FakeExecutor::default(), &["k"]);
        let app = application(json!([
            {"name": "queue", "kind": "gcp/queue"},
            {"name": "worker", "kind": "k", "depends_on": ["queue"]},
            {"name": "bucket", "kind": "k"}
        ]));

        let report = run(&h, app).await;

        assert_eq!(
            reason(&report, "queue"),
            "no plugin registered for kind 'gcp/queue'"
        );
        assert_eq!(reason(&report, "worker"), REASON_DEPENDENCY_FAILED);
        assert_eq!(status(&report, "bucket"), ResourceStatus::Deployed);
    }

    #[tokio::test]
    async fn test_unknown_dependency() {
        let h = harness(FakeExecutor::default(), &["k"]);
        let app = application(json!([
            {"name": "api", "kind": "k", "depends_on": ["ghost", "phantom"]}
        ]));

        let report = run(&h, app).await;

        assert_eq!(reason(&report, "api"), "unknown dependency 'ghost'");
        assert!(h.executor.calls_for("api").is_empty());
    }

    #[tokio::test]
    async fn test_reference_error_fails_resource() {
        let h = harness(FakeExecutor::default(), &["k"]);
        let app = application(json!([
            {"name": "api", "kind": "k", "properties": {"url": "${db.output.host}"}}
        ]));

        let report = run(&h, app).await;

        assert_eq!(status(&report, "api"), ResourceStatus::Failed);
        assert!(reason(&report, "api").contains("db.output.host"));
        assert!(h.executor.calls_for("api").is_empty());
    }

    #[tokio::test]
    async fn test_plan_only_skips_deploy_and_output() {
        let mut h = harness(FakeExecutor::default(), &["k"]);
        h.engine = h.engine.clone().plan_only(true);
        let app = application(json!([
            {"name": "a", "kind": "k"},
            {"name": "b", "kind": "k", "depends_on": ["a"]}
        ]));

        let report = run(&h, app).await;

        assert!(report.is_success());
        assert_eq!(h.executor.calls_for("a"), vec![PluginStage::Plan]);
        assert_eq!(h.executor.calls_for("b"), vec![PluginStage::Plan]);
        assert_eq!(reason(&report, "b"), "Resource planned successfully");
    }

    #[tokio::test]
    async fn test_configuration_merged_before_resources() {
        let h = harness(FakeExecutor::default(), &["k"]);
        let app = application(json!([
            {"name": "bucket", "kind": "k", "properties": {"region": "${env}"}}
        ]));
        let config = Configuration::new(app.id, json!({"config": {"env": "us-east-1"}}));

        let report = h
            .engine
            .run(RecordId::new(), &app, Some(&config), None)
            .await;

        assert!(report.is_success());
        let rendered = h.executor.rendered.lock().unwrap()["bucket"].clone();
        assert!(rendered.contains("region: us-east-1"));
    }

    #[tokio::test]
    async fn test_broken_template_aborts_run() {
        let h = harness(FakeExecutor::default(), &["k"]);
        let app = application(json!([
            {"name": "bucket", "kind": "k", "properties": {"region": "${env}"}}
        ]));
        let config = Configuration::new(app.id, json!({"config": {"env": "x'\n: ["}}));

        let report = h
            .engine
            .run(RecordId::new(), &app, Some(&config), None)
            .await;

        assert_eq!(report.state, DeploymentState::Failed);
        assert_eq!(report.phase, EnginePhase::Failed);
        assert!(report.error.is_some());
        assert!(h.executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_names_abort_run() {
        let h = harness(FakeExecutor::default(), &["k"]);
        let app = application(json!([
            {"name": "a", "kind": "k"},
            {"name": "a", "kind": "k"}
        ]));

        let report = run(&h, app).await;

        assert_eq!(report.state, DeploymentState::Failed);
        assert!(report.error.unwrap().contains("duplicate"));
    }

    #[tokio::test]
    async fn test_missing_plugin_directory_aborts_run() {
        let work = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            work_dir: work.path().to_path_buf(),
            plugin_dir: work.path().join("missing"),
            ..WorkerConfig::default()
        };
        let engine = DeploymentEngine::new(Arc::new(FakeExecutor::default()), Arc::new(config));
        let app = application(json!([{"name": "a", "kind": "k"}]));

        let report = engine.run(RecordId::new(), &app, None, None).await;

        assert_eq!(report.phase, EnginePhase::Failed);
        assert!(report.error.unwrap().contains("plugin directory"));
    }

    #[tokio::test]
    async fn test_empty_application_is_deployed() {
        let h = harness(FakeExecutor::default(), &[]);
        let report = run(&h, application(json!([]))).await;
        assert!(report.is_success());
        assert!(report.resources.is_empty());
    }

    #[tokio::test]
    async fn test_execute_streams_events() {
        let h = harness(FakeExecutor::default(), &["k"]);
        let app = application(json!([{"name": "a", "kind": "k"}]));

        let (mut rx, handle) = h.engine.execute(RecordId::new(), app, None);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let report = handle.await.unwrap();

        assert!(report.is_success());
        assert!(matches!(
            events.first(),
            Some(EngineEvent::PhaseChanged {
                phase: EnginePhase::Initializing
            })
        ));
        assert!(events.iter().any(
            |e| matches!(e, EngineEvent::ResourceStarted { resource } if resource == "a")
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::ResourceLog { line, .. } if line.content == "deploy a"
        )));
        assert!(matches!(
            events.last(),
            Some(EngineEvent::DeploymentCompleted {
                state: DeploymentState::Deployed
            })
        ));
    }

    #[tokio::test]
    async fn test_colliding_names_get_separate_scratch_dirs() {
        let h = harness(FakeExecutor::default(), &["k"]);
        let app = application(json!([
            {"name": "a b", "kind": "k", "properties": {"owner": "first"}},
            {"name": "a_b", "kind": "k", "properties": {"owner": "second"}}
        ]));

        let report = run(&h, app).await;
        assert!(report.is_success());

        let specs = h.executor.specs.lock().unwrap();
        let dirs: HashSet<&PathBuf> = specs
            .values()
            .filter(|spec| spec.stage == PluginStage::Plan)
            .map(|spec| &spec.working_dir)
            .collect();
        assert_eq!(dirs.len(), 2);
        let rendered = h.executor.rendered.lock().unwrap();
        assert!(rendered["a b"].contains("first"));
        assert!(rendered["a_b"].contains("second"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relative_directories_resolve_against_cwd() {
        use devex_executor::ProcessExecutor;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::Builder::new()
            .prefix("devex-engine-")
            .tempdir_in(".")
            .unwrap();
        let relative = PathBuf::from(dir.path().file_name().unwrap());
        let plugin_root = relative.join("plugins/test/kind");
        std::fs::create_dir_all(&plugin_root).unwrap();
        let script = plugin_root.join("plugin.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ntest -f \"$2\" || exit 7\ntest -d \"$PLUGIN_DIR\" || exit 8\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = WorkerConfig {
            plugin_dir: relative.join("plugins"),
            work_dir: relative.join("work"),
            ..WorkerConfig::default()
        };
        let engine = DeploymentEngine::new(Arc::new(ProcessExecutor::new()), Arc::new(config));
        let app = application(json!([{"name": "bucket", "kind": "test/kind"}]));

        let report = engine.run(RecordId::new(), &app, None, None).await;

        assert!(report.is_success(), "{:?}", report.resources);
        assert!(relative.join("work").is_dir());
    }

    #[test]
    fn test_scratch_dir_sanitized() {
        let root = std::path::Path::new("/work/dep");
        assert_eq!(scratch_dir(root, 0, "bucket"), root.join("bucket"));
        assert_eq!(scratch_dir(root, 1, "a/b c"), root.join("a_b_c~1"));
        assert_eq!(scratch_dir(root, 2, ".."), root.join("_..~2"));
        assert_eq!(scratch_dir(root, 3, ""), root.join("_~3"));
    }
}
