//! Solver runner for experiment units of work.
//!
//! # Architecture
//!
//! ```text
//! RunConfig → Orchestrator → ResultCache (hit?) → Invoker → Solver → output_dir / log_dir
//! ```
//!
//! The orchestrator:
//! 1. Derives the cache key for the configuration
//! 2. Returns a cached result if one exists and `force` is unset
//! 3. Otherwise runs the solver once under the time budget
//! 4. Stores the result and reports an exit status
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use taskforge::{cache::ResultCache, config::ConfigOptions, runner::Orchestrator, solver::CommandSolver};
//!
//! let config = ConfigOptions::new()
//!     .with_task("bamboogle")
//!     .with_data_file("bamboogle/data/data.json")
//!     .with_model("gpt-4o-mini")
//!     .resolve()?;
//!
//! let cache = Arc::new(ResultCache::open(config.cache_dir()));
//! let orchestrator = Orchestrator::new(cache, Arc::new(CommandSolver::new("./solve.py")));
//! let outcome = orchestrator.execute(&config).await?;
//!
//! println!("{} (cached: {})", outcome.result.status, outcome.cache_hit);
//! ```

pub mod invoker;
pub mod orchestrator;
pub mod result;

pub use invoker::Invoker;
pub use orchestrator::{BatchEntry, BatchReport, Orchestrator, Outcome, RunExit};
pub use result::{InvocationResult, InvocationState, InvocationStatus};
