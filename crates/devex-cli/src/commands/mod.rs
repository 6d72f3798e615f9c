//! CLI command implementations.

pub mod daemon;
pub mod deploy;
pub mod validate;

use anyhow::{Context, Result};
use devex_config::WorkerConfig;
use devex_config::system::load_worker_config;
use std::path::{Path, PathBuf};

/// Used when `--config` is not given and the file exists.
const DEFAULT_CONFIG_FILE: &str = "worker.kdl";

/// Command-line settings that take precedence over the config file and environment.
#[derive(Debug, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub plugin_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

/// File, then `DEVEX_*` environment, then flags.
pub fn load_config(overrides: &Overrides) -> Result<WorkerConfig> {
    let mut config = match &overrides.config {
        Some(path) => load_worker_config(path)
            .with_context(|| format!("Failed to load worker config: {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            load_worker_config(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("Failed to load worker config: {}", DEFAULT_CONFIG_FILE))?
        }
        None => WorkerConfig::default(),
    };

    config.apply_env();

    if let Some(dir) = &overrides.plugin_dir {
        config.plugin_dir = dir.clone();
    }
    if let Some(dir) = &overrides.work_dir {
        config.work_dir = dir.clone();
    }

    Ok(config)
}
