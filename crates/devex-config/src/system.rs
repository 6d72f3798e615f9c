//! Worker configuration parsing.
//!
//! ```kdl
//! worker {
//!     api-url "http://localhost:8000/api"
//!     plugin-dir "plugins"
//!     work-dir ".devex-runner/executions"
//!     poll-interval-secs 10
//!     max-concurrent 3
//!     plugin-timeout-secs 900
//!     dedup "never"
//! }
//! plugin "aws/s3_bucket" path="/opt/devex/s3/plugin.sh"
//! ```

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::nodes::{get_first_string_arg, get_string_prop, get_u64_arg, require_string_arg};
use crate::{ConfigError, ConfigResult};

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_PLUGIN_DIR: &str = "plugins";
pub const DEFAULT_WORK_DIR: &str = ".devex-runner/executions";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// When ids leave the daemon's scheduled set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupPolicy {
    /// Never evict: an id is launched at most once per process lifetime.
    #[default]
    Never,
    /// Evict once the run finished and the store stopped listing the id as pending.
    EvictTerminal,
}

impl std::str::FromStr for DedupPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(DedupPolicy::Never),
            "evict-terminal" => Ok(DedupPolicy::EvictTerminal),
            other => Err(ConfigError::InvalidValue {
                field: "dedup".to_string(),
                message: format!("unknown policy '{}', expected never or evict-terminal", other),
            }),
        }
    }
}

/// Explicit kind → executable binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginOverride {
    pub kind: String,
    pub path: PathBuf,
}

/// Configuration for the deployment worker and daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Base URL of the deployment API.
    pub api_url: String,
    /// Bearer token for the deployment API.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    /// Directory holding one sub-directory per plugin kind.
    pub plugin_dir: PathBuf,
    /// Root for per-deployment scratch directories.
    pub work_dir: PathBuf,
    pub poll_interval: Duration,
    /// Maximum deployment runs in flight at once.
    pub max_concurrent: usize,
    /// Default per-stage plugin timeout. `None` waits indefinitely.
    pub plugin_timeout: Option<Duration>,
    pub dedup: DedupPolicy,
    pub plugins: Vec<PluginOverride>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            plugin_timeout: None,
            dedup: DedupPolicy::Never,
            plugins: Vec::new(),
        }
    }
}

impl WorkerConfig {
    /// Apply `DEVEX_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DEVEX_API_URL") {
            self.api_url = url;
        }
        if let Ok(token) = std::env::var("DEVEX_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Ok(dir) = std::env::var("DEVEX_PLUGIN_DIR") {
            self.plugin_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("DEVEX_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
    }
}

/// Parse worker configuration from KDL text. Unset fields keep their defaults.
pub fn parse_worker_config(kdl: &str) -> ConfigResult<WorkerConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = WorkerConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "worker" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        apply_worker_setting(&mut config, child)?;
                    }
                }
            }
            "plugin" => {
                config.plugins.push(parse_plugin_override(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Read and parse a worker configuration file.
pub fn load_worker_config(path: &Path) -> ConfigResult<WorkerConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_worker_config(&content)
}

fn apply_worker_setting(config: &mut WorkerConfig, node: &KdlNode) -> ConfigResult<()> {
    match node.name().value() {
        "api-url" => config.api_url = require_string_arg(node)?,
        "api-token" => config.api_token = Some(require_string_arg(node)?),
        "plugin-dir" => config.plugin_dir = PathBuf::from(require_string_arg(node)?),
        "work-dir" => config.work_dir = PathBuf::from(require_string_arg(node)?),
        "poll-interval-secs" => {
            let secs = get_u64_arg(node)?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "poll-interval-secs".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            config.poll_interval = Duration::from_secs(secs);
        }
        "max-concurrent" => {
            let max = get_u64_arg(node)?;
            if max == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "max-concurrent".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            config.max_concurrent = max as usize;
        }
        "plugin-timeout-secs" => {
            config.plugin_timeout = Some(Duration::from_secs(get_u64_arg(node)?));
        }
        "dedup" => config.dedup = require_string_arg(node)?.parse()?,
        _ => {}
    }
    Ok(())
}

fn parse_plugin_override(node: &KdlNode) -> ConfigResult<PluginOverride> {
    let kind = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("plugin kind".to_string()))?;
    let path = get_string_prop(node, "path")
        .ok_or_else(|| ConfigError::MissingField(format!("path for plugin '{}'", kind)))?;

    Ok(PluginOverride {
        kind,
        path: PathBuf::from(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            worker {
                api-url "https://deploy.example.com/api"
                plugin-dir "/opt/devex/plugins"
                work-dir "/var/lib/devex"
                poll-interval-secs 5
                max-concurrent 8
                plugin-timeout-secs 900
                dedup "evict-terminal"
            }

            plugin "aws/s3_bucket" path="/opt/s3/plugin.sh"
            plugin "gcp/bucket" path="/opt/gcs/plugin.sh"
        "#;

        let config = parse_worker_config(kdl).unwrap();
        assert_eq!(config.api_url, "https://deploy.example.com/api");
        assert_eq!(config.plugin_dir, PathBuf::from("/opt/devex/plugins"));
        assert_eq!(config.work_dir, PathBuf::from("/var/lib/devex"));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.plugin_timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.dedup, DedupPolicy::EvictTerminal);
        assert_eq!(config.plugins.len(), 2);
        assert_eq!(config.plugins[1].kind, "gcp/bucket");
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = parse_worker_config("").unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.max_concurrent, 3);
        assert!(config.plugin_timeout.is_none());
        assert_eq!(config.dedup, DedupPolicy::Never);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = parse_worker_config("worker {\n max-concurrent 0\n}");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_unknown_dedup_policy_rejected() {
        let result = parse_worker_config("worker {\n dedup \"sometimes\"\n}");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_plugin_override_requires_path() {
        let result = parse_worker_config(r#"plugin "aws/s3_bucket""#);
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }
}
