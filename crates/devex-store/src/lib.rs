//! Deployment store implementations for devex.
//!
//! - [`HttpStore`]: the REST deployment API
//! - [`MemoryStore`]: in-process, for local runs and tests

pub mod error;
pub mod http;
pub mod memory;

pub use error::{StoreError, StoreResult};
pub use http::HttpStore;
pub use memory::MemoryStore;
