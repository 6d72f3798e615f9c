//! Stage contract for one resource's plugin.

use devex_config::document::{parse_document, to_yaml};
use devex_core::plugin::{
    LogLine, PLUGIN_DIR_ENV, PluginBinding, PluginExecutor, PluginExit, PluginSpec, PluginStage,
};
use devex_core::{Error, RecordId, Resource, Result};
use futures::StreamExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Name of the rendered resource document inside the scratch directory.
pub const RESOURCE_FILE: &str = "resource.yaml";

/// Runs the `plan`, `deploy` and `output` stages of one plugin against one
/// rendered resource.
pub struct PluginRunner {
    executor: Arc<dyn PluginExecutor>,
    binding: PluginBinding,
    resource: String,
    working_dir: PathBuf,
    resource_file: PathBuf,
}

impl PluginRunner {
    pub fn new(
        executor: Arc<dyn PluginExecutor>,
        binding: PluginBinding,
        resource: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        let working_dir = working_dir.into();
        Self {
            executor,
            binding,
            resource: resource.into(),
            resource_file: working_dir.join(RESOURCE_FILE),
            working_dir,
        }
    }

    /// Create the scratch directory and write the rendered resource into it.
    pub async fn prepare(&self, resource: &Resource) -> Result<()> {
        tokio::fs::create_dir_all(&self.working_dir).await?;
        let yaml = to_yaml(resource).map_err(|e| {
            Error::InvalidInput(format!("cannot serialize resource '{}': {}", resource.name, e))
        })?;
        tokio::fs::write(&self.resource_file, yaml).await?;
        debug!(resource = %self.resource, file = %self.resource_file.display(), "Wrote resource file");
        Ok(())
    }

    pub async fn plan(&self, sink: Option<&mpsc::Sender<LogLine>>) -> Result<PluginExit> {
        self.run_stage(PluginStage::Plan, sink).await
    }

    pub async fn deploy(&self, sink: Option<&mpsc::Sender<LogLine>>) -> Result<PluginExit> {
        self.run_stage(PluginStage::Deploy, sink).await
    }

    /// Structured data the plugin reports about what it deployed.
    ///
    /// `None` when the plugin does not declare the `output` capability or
    /// prints nothing. Stdout must otherwise be a YAML (or JSON) mapping.
    pub async fn output(&self) -> Result<Option<Map<String, Value>>> {
        if !self.binding.supports(PluginStage::Output) {
            return Ok(None);
        }

        let exit = self.run_stage(PluginStage::Output, None).await?;
        let text = exit.stdout.join("\n");
        match parse_document(&text) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(Value::Null) => Ok(None),
            Ok(other) => Err(Error::plugin_execution(
                format!("output stage printed a {} instead of a mapping", type_name(&other)),
                exit.output,
            )),
            Err(e) => Err(Error::plugin_execution(
                format!("output stage printed invalid YAML: {}", e),
                exit.output,
            )),
        }
    }

    async fn run_stage(
        &self,
        stage: PluginStage,
        sink: Option<&mpsc::Sender<LogLine>>,
    ) -> Result<PluginExit> {
        let spec = PluginSpec {
            id: RecordId::new(),
            resource: self.resource.clone(),
            kind: self.binding.kind.clone(),
            executable: self.binding.executable.clone(),
            stage,
            resource_file: self.resource_file.clone(),
            working_dir: self.working_dir.clone(),
            env: HashMap::from([(
                PLUGIN_DIR_ENV.to_string(),
                self.binding.root.to_string_lossy().to_string(),
            )]),
            timeout: self.binding.timeout,
        };

        info!(resource = %self.resource, kind = %self.binding.kind, stage = %stage, "Running plugin stage");
        let handle = self.executor.spawn(spec).await?;
        let mut logs = self.executor.logs(&handle).await?;

        let forward = async {
            while let Some(line) = logs.next().await {
                if let Some(sink) = sink {
                    // A dropped receiver only loses live progress
                    let _ = sink.send(line).await;
                }
            }
        };
        let ((), exit) = tokio::join!(forward, self.executor.wait(&handle));
        exit
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
