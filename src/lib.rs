//! taskforge: experiment launcher with result caching.
//!
//! This library resolves run configurations, derives cache keys for units
//! of work, and invokes an external solver at most once per key under a
//! wall-clock budget.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod runner;
pub mod solver;

// Re-export commonly used types
pub use cache::{CacheKey, ResultCache};
pub use config::{ConfigOptions, RunConfig};
pub use error::{CacheError, ConfigError, RunError, SolverError};
pub use runner::{InvocationResult, InvocationStatus, Orchestrator, Outcome, RunExit};
