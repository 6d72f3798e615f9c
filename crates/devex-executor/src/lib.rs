//! Plugin execution for devex.
//!
//! - [`ProcessExecutor`]: runs plugins as local child processes
//! - [`PluginRegistry`]: binds resource kinds to plugin executables
//! - [`PluginRunner`]: the plan/deploy/output stage contract for one resource

pub mod process;
pub mod registry;
pub mod runner;

pub use devex_core::plugin::{
    LogLine, LogStream, PluginBinding, PluginExecutor, PluginExit, PluginHandle, PluginSpec,
    PluginStage,
};
pub use process::ProcessExecutor;
pub use registry::PluginRegistry;
pub use runner::{PluginRunner, RESOURCE_FILE};
