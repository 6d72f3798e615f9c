//! Documents, templating and configuration for devex.
//!
//! This crate handles:
//! - YAML application, configuration and resource documents
//! - Configuration templating (`${key}`)
//! - Cross-resource reference resolution (`${resource.section.field}`)
//! - KDL worker configuration and plugin manifests

pub mod document;
pub mod error;
pub mod manifest;
mod nodes;
pub mod references;
pub mod system;
pub mod template;

pub use error::{ConfigError, ConfigResult};
pub use manifest::PluginManifest;
pub use references::{Reference, ReferenceContext};
pub use system::{DedupPolicy, PluginOverride, WorkerConfig};
