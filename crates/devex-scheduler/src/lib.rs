//! Deployment scheduling for devex.
//!
//! - [`DeploymentEngine`] deploys one application's resources in dependency order
//! - [`SchedulerDaemon`] polls the store and runs pending deployments
//! - [`StoreRunner`] connects the two: it loads records, runs the engine and
//!   persists the final state

pub mod daemon;
pub mod engine;
pub mod error;
pub mod graph;
pub mod launcher;
pub mod tracker;

pub use daemon::{DaemonHandle, DaemonSettings, DeploymentLauncher, PollSummary, SchedulerDaemon};
pub use engine::{DeploymentEngine, DeploymentReport, EngineEvent, EnginePhase};
pub use error::{RunError, RunResult};
pub use launcher::StoreRunner;
pub use tracker::{DependencyTracker, Readiness};
