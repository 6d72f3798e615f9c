//! Plugin executor trait and invocation types.
//!
//! A plugin is an external executable implementing the stage contract for one
//! resource kind: `<executable> <stage> <resource-file>`. Executors start the
//! process, expose its merged output as a stream, and report how it exited.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{RecordId, Result};

/// Environment variable pointing a plugin at its own directory.
pub const PLUGIN_DIR_ENV: &str = "PLUGIN_DIR";

/// A stage of the plugin contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStage {
    Plan,
    Deploy,
    /// Reports structured data about what `deploy` created.
    Output,
}

impl PluginStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginStage::Plan => "plan",
            PluginStage::Deploy => "deploy",
            PluginStage::Output => "output",
        }
    }
}

impl std::fmt::Display for PluginStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PluginStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "plan" => Ok(PluginStage::Plan),
            "deploy" => Ok(PluginStage::Deploy),
            "output" => Ok(PluginStage::Output),
            other => Err(format!("unknown plugin stage: {}", other)),
        }
    }
}

/// The executable bound to one resource kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginBinding {
    pub kind: String,
    /// Path to the plugin entrypoint.
    pub executable: PathBuf,
    /// Directory exposed to the plugin as `PLUGIN_DIR`.
    pub root: PathBuf,
    /// Stages the plugin implements. `plan` and `deploy` are always present.
    pub capabilities: Vec<PluginStage>,
    /// Per-stage time limit. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl PluginBinding {
    pub fn new(kind: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let root = executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            kind: kind.into(),
            executable,
            root,
            capabilities: vec![PluginStage::Plan, PluginStage::Deploy],
            timeout: None,
        }
    }

    pub fn with_capability(mut self, stage: PluginStage) -> Self {
        if !self.capabilities.contains(&stage) {
            self.capabilities.push(stage);
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn supports(&self, stage: PluginStage) -> bool {
        self.capabilities.contains(&stage)
    }
}

/// Specification for one plugin process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Unique identifier for this invocation.
    pub id: RecordId,
    /// Resource the invocation acts on.
    pub resource: String,
    pub kind: String,
    pub executable: PathBuf,
    pub stage: PluginStage,
    /// Rendered resource document passed as the final argument.
    pub resource_file: PathBuf,
    /// Scratch directory the process runs in.
    pub working_dir: PathBuf,
    /// Variables added on top of the inherited environment.
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl PluginSpec {
    /// Arguments passed to the executable.
    pub fn args(&self) -> Vec<String> {
        vec![
            self.stage.to_string(),
            self.resource_file.to_string_lossy().to_string(),
        ]
    }

    /// Human-readable command line, for logging.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.executable.to_string_lossy().to_string()];
        parts.extend(self.args());
        parts.join(" ")
    }
}

/// Handle to a running or finished plugin process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHandle {
    pub id: RecordId,
    pub resource: String,
    pub stage: PluginStage,
    /// Executor-specific identifier (e.g. process id).
    pub executor_id: String,
    pub executor_name: String,
}

/// How a plugin process finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginExit {
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Merged stdout/stderr transcript.
    pub output: Vec<String>,
    /// Stdout lines only.
    pub stdout: Vec<String>,
}

/// A line of plugin output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

impl LogLine {
    pub fn new(stream: LogStream, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// Trait for plugin executors.
///
/// Start, stream and wait are separate so a caller can interleave its own
/// progress reporting with the plugin's output.
#[async_trait]
pub trait PluginExecutor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Start a plugin process. Does not wait for it.
    async fn spawn(&self, spec: PluginSpec) -> Result<PluginHandle>;

    /// Stream of output lines as they arrive. Ends when the process closes its output.
    async fn logs(&self, handle: &PluginHandle) -> Result<BoxStream<'static, LogLine>>;

    /// Wait for the process to finish. Nonzero exit is a `PluginExecution` error.
    async fn wait(&self, handle: &PluginHandle) -> Result<PluginExit>;
}
