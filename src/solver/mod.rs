//! The external solver boundary.
//!
//! A [`Solver`] consumes one unit of work and produces its output. The
//! solver's internals are opaque here; the invoker only enforces the time
//! budget around [`Solver::solve`].

pub mod command;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::SolverError;

pub use command::CommandSolver;

/// Everything the solver is told about one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveRequest {
    pub task: String,
    pub data_file: PathBuf,
    pub index: u64,
    pub model: String,
    pub enabled_tools: Vec<String>,
    pub output_types: Vec<String>,
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_time_seconds: u64,
}

impl SolveRequest {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            task: config.task().to_string(),
            data_file: config.data_file().to_path_buf(),
            index: config.index(),
            model: config.model().to_string(),
            enabled_tools: config.enabled_tools().iter().cloned().collect(),
            output_types: config.output_types().iter().cloned().collect(),
            cache_dir: config.cache_dir().to_path_buf(),
            output_dir: config.output_dir().to_path_buf(),
            max_time_seconds: config.max_time_seconds(),
        }
    }

    /// Command-line flags understood by the solver program.
    pub fn launcher_args(&self) -> Vec<String> {
        vec![
            "--index".to_string(),
            self.index.to_string(),
            "--task".to_string(),
            self.task.clone(),
            "--data_file".to_string(),
            self.data_file.display().to_string(),
            "--llm_engine_name".to_string(),
            self.model.clone(),
            "--root_cache_dir".to_string(),
            self.cache_dir.display().to_string(),
            "--output_json_dir".to_string(),
            self.output_dir.display().to_string(),
            "--output_types".to_string(),
            self.output_types.join(","),
            "--enabled_tools".to_string(),
            self.enabled_tools.join(","),
            "--max_time".to_string(),
            self.max_time_seconds.to_string(),
        ]
    }
}

/// What a solver produced on normal completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverOutput {
    /// Result payload. Process solvers drop one trailing line terminator.
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl SolverOutput {
    /// Output carrying only a result payload.
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }
}

/// Trait for solver backends.
#[async_trait]
pub trait Solver: Send + Sync {
    /// Short name for log lines.
    fn name(&self) -> &str;

    /// Runs the solver once. Dropping the returned future must cancel the work.
    async fn solve(&self, request: &SolveRequest) -> Result<SolverOutput, SolverError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOptions;

    #[test]
    fn test_launcher_args() {
        let config = ConfigOptions::new()
            .with_task("bamboogle")
            .with_data_file("bamboogle/data/data.json")
            .with_model("gpt-4o-mini")
            .with_enabled_tools(["Google_Search_Tool", "Base_Generator_Tool"])
            .with_index(4)
            .with_max_time(500)
            .with_cache_dir("cache")
            .with_output_dir("out")
            .resolve()
            .unwrap();

        let args = SolveRequest::from_config(&config).launcher_args();
        let flag = |name: &str| {
            let pos = args.iter().position(|a| a == name).expect("flag present");
            args[pos + 1].clone()
        };

        assert_eq!(flag("--index"), "4");
        assert_eq!(flag("--task"), "bamboogle");
        assert_eq!(flag("--llm_engine_name"), "gpt-4o-mini");
        assert_eq!(flag("--enabled_tools"), "Base_Generator_Tool,Google_Search_Tool");
        assert_eq!(flag("--output_types"), "direct");
        assert_eq!(flag("--root_cache_dir"), "cache");
        assert_eq!(flag("--output_json_dir"), "out");
        assert_eq!(flag("--max_time"), "500");
    }
}
