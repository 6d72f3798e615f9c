//! Deployment-fatal errors.

use devex_config::ConfigError;
use thiserror::Error;

/// An error that aborts a whole deployment run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] devex_core::Error),
}

pub type RunResult<T> = std::result::Result<T, RunError>;
