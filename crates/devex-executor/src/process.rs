//! Local process executor.
//!
//! Runs plugins as child processes of the worker. Stdout and stderr are read
//! line by line into a shared transcript and a log channel, so the caller can
//! stream progress while `wait` still sees the full output.

use async_trait::async_trait;
use chrono::Utc;
use devex_core::RecordId;
use devex_core::plugin::{
    LogLine, LogStream, PluginExecutor, PluginExit, PluginHandle, PluginSpec,
};
use devex_core::{Error, Result};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Transcript {
    merged: Vec<String>,
    stdout: Vec<String>,
}

type SharedTranscript = Arc<Mutex<Transcript>>;

struct RunningPlugin {
    child: Child,
    command_line: String,
    started_at: chrono::DateTime<Utc>,
    timeout: Option<Duration>,
    logs: Option<mpsc::UnboundedReceiver<LogLine>>,
    transcript: SharedTranscript,
    readers: Vec<JoinHandle<()>>,
}

/// Executor that runs plugins as local child processes.
#[derive(Default)]
pub struct ProcessExecutor {
    running: Mutex<HashMap<RecordId, RunningPlugin>>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_running(&self, id: &RecordId) -> Result<RunningPlugin> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| Error::Internal("process table lock poisoned".to_string()))?;
        running
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("no running plugin with id {}", id)))
    }
}

fn spawn_reader<R>(
    reader: R,
    stream: LogStream,
    transcript: SharedTranscript,
    tx: mpsc::UnboundedSender<LogLine>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim_end().to_string();
                    if let Ok(mut t) = transcript.lock() {
                        t.merged.push(line.clone());
                        if matches!(stream, LogStream::Stdout) {
                            t.stdout.push(line.clone());
                        }
                    }
                    // Nobody may be listening; the transcript still has the line
                    let _ = tx.send(LogLine::new(stream, line));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, ?stream, "Error reading plugin output");
                    break;
                }
            }
        }
    })
}

fn snapshot(transcript: &SharedTranscript) -> Transcript {
    transcript
        .lock()
        .map(|t| Transcript {
            merged: t.merged.clone(),
            stdout: t.stdout.clone(),
        })
        .unwrap_or_default()
}

#[async_trait]
impl PluginExecutor for ProcessExecutor {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn spawn(&self, spec: PluginSpec) -> Result<PluginHandle> {
        let command_line = spec.command_line();
        info!(resource = %spec.resource, stage = %spec.stage, command = %command_line, "Starting plugin");

        let mut child = Command::new(&spec.executable)
            .args(spec.args())
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::plugin_execution(
                    format!("failed to start '{}': {}", spec.executable.display(), e),
                    Vec::new(),
                )
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("plugin stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("plugin stderr not captured".to_string()))?;

        let transcript = SharedTranscript::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let readers = vec![
            spawn_reader(stdout, LogStream::Stdout, transcript.clone(), tx.clone()),
            spawn_reader(stderr, LogStream::Stderr, transcript.clone(), tx),
        ];

        let executor_id = child.id().map(|pid| pid.to_string()).unwrap_or_default();
        let handle = PluginHandle {
            id: spec.id,
            resource: spec.resource.clone(),
            stage: spec.stage,
            executor_id,
            executor_name: self.name().to_string(),
        };

        let running = RunningPlugin {
            child,
            command_line,
            started_at: Utc::now(),
            timeout: spec.timeout,
            logs: Some(rx),
            transcript,
            readers,
        };
        self.running
            .lock()
            .map_err(|_| Error::Internal("process table lock poisoned".to_string()))?
            .insert(spec.id, running);

        Ok(handle)
    }

    async fn logs(&self, handle: &PluginHandle) -> Result<BoxStream<'static, LogLine>> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| Error::Internal("process table lock poisoned".to_string()))?;
        let plugin = running
            .get_mut(&handle.id)
            .ok_or_else(|| Error::NotFound(format!("no running plugin with id {}", handle.id)))?;
        let rx = plugin
            .logs
            .take()
            .ok_or_else(|| Error::Internal("plugin log stream already taken".to_string()))?;

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn wait(&self, handle: &PluginHandle) -> Result<PluginExit> {
        let RunningPlugin {
            mut child,
            command_line,
            started_at,
            timeout,
            transcript,
            readers,
            ..
        } = self.take_running(&handle.id)?;

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(resource = %handle.resource, stage = %handle.stage, ?limit, "Plugin timed out, killing");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill plugin process");
                    }
                    // Descendants may still hold the pipes open
                    for reader in &readers {
                        reader.abort();
                    }
                    return Err(Error::plugin_execution(
                        format!("'{}' timed out after {}s", command_line, limit.as_secs()),
                        snapshot(&transcript).merged,
                    ));
                }
            },
            None => child.wait().await,
        };

        // Readers finish once the process closes its pipes
        for reader in readers {
            let _ = reader.await;
        }
        let Transcript { merged, stdout } = snapshot(&transcript);

        let status = status.map_err(|e| {
            Error::plugin_execution(format!("failed to wait for '{}': {}", command_line, e), merged.clone())
        })?;

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(Error::plugin_execution(
                format!("'{}' failed with exit code {}", command_line, code),
                merged,
            ));
        }

        debug!(resource = %handle.resource, stage = %handle.stage, lines = merged.len(), "Plugin exited");
        Ok(PluginExit {
            exit_code: status.code(),
            started_at,
            finished_at: Utc::now(),
            output: merged,
            stdout,
        })
    }
}
