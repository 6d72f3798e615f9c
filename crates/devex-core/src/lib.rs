//! Core domain types and traits for the devex deployment engine.
//!
//! This crate contains:
//! - Record identifiers and the error taxonomy
//! - Resource, application, configuration and deployment types
//! - The plugin executor trait and invocation types
//! - The external deployment store trait

pub mod application;
pub mod deployment;
pub mod error;
pub mod id;
pub mod plugin;
pub mod resource;
pub mod store;

pub use application::{Application, Configuration};
pub use deployment::{Deployment, DeploymentState, DeploymentUpdate};
pub use error::{Error, Result};
pub use id::RecordId;
pub use resource::{Resource, ResourceState, ResourceStatus};
pub use store::DeploymentStore;
