//! Error types for devex.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no plugin registered for kind '{kind}'")]
    PluginBinding { kind: String },

    #[error("plugin directory unavailable: {0}")]
    PluginDirectory(String),

    /// Nonzero exit or launch failure. `output` holds the merged transcript
    /// collected up to the point of failure.
    #[error("plugin execution failed: {message}")]
    PluginExecution { message: String, output: Vec<String> },

    #[error("dependency cycle detected: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a `PluginExecution` error with the transcript attached.
    pub fn plugin_execution(message: impl Into<String>, output: Vec<String>) -> Self {
        Self::PluginExecution {
            message: message.into(),
            output,
        }
    }

    /// Text recorded as a resource's failure reason. Plugin failures carry the
    /// tail of their transcript so the cause survives into the deployment record.
    pub fn failure_reason(&self) -> String {
        match self {
            Error::PluginExecution { message, output } if !output.is_empty() => {
                let tail_start = output.len().saturating_sub(REASON_TAIL_LINES);
                format!("{}\n{}", message, output[tail_start..].join("\n"))
            }
            other => other.to_string(),
        }
    }
}

const REASON_TAIL_LINES: usize = 20;

pub type Result<T> = std::result::Result<T, Error>;
