//! Configuration and document errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Kdl(#[from] kdl::KdlError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The definition no longer parses after configuration values were substituted.
    #[error("configuration template error: {0}")]
    Template(String),

    #[error("failed to resolve reference '{placeholder}': {message}")]
    Reference { placeholder: String, message: String },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn reference(placeholder: &str, message: impl Into<String>) -> Self {
        Self::Reference {
            placeholder: placeholder.to_string(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
