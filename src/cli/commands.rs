//! CLI command definitions for taskforge.
//!
//! The run flags mirror the solver's own launcher flags, so an existing
//! launcher script can point at `taskforge run` unchanged.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use crate::cache::{CacheKey, ResultCache};
use crate::config::{split_list, ConfigOptions, RunConfig};
use crate::error::{CacheError, ConfigError};
use crate::models::ModelBackend;
use crate::runner::{InvocationStatus, Orchestrator, RunExit};
use crate::solver::CommandSolver;

/// Experiment launcher with result caching.
#[derive(Parser)]
#[command(name = "taskforge")]
#[command(about = "Run an external solver per data index with result caching and a time budget")]
#[command(version)]
#[command(
    long_about = "taskforge resolves a run configuration, returns cached results when available, and otherwise invokes an external solver exactly once under a wall-clock budget.\n\nExample usage:\n  taskforge run --task bamboogle --data_file bamboogle/data/data.json --llm_engine_name gpt-4o-mini --index 0 --solver ./solve.py"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the solver for one data index.
    Run(RunArgs),

    /// Run the solver for many data indices.
    Batch(BatchArgs),

    /// Print the cache key of the resolved configuration.
    Key(ConfigArgs),

    /// Print the cached result of the resolved configuration as JSON.
    Show(ConfigArgs),

    /// Remove the cached result of the resolved configuration.
    Clear(ConfigArgs),

    /// List supported model backends.
    Models,
}

/// Options that resolve into a run configuration.
///
/// Every option may also come from a `TASKFORGE_*` environment variable or
/// the `--config` YAML file; flags win.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ConfigArgs {
    /// YAML file with configuration options.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Task name.
    #[arg(long)]
    pub task: Option<String>,

    /// Data file of the task.
    #[arg(long = "data_file")]
    pub data_file: Option<PathBuf>,

    /// Directory for raw transcripts (default: <task>/logs/<label>).
    #[arg(long = "log_dir")]
    pub log_dir: Option<PathBuf>,

    /// Directory for structured results (default: <task>/results/<label>).
    #[arg(long = "output_json_dir")]
    pub output_dir: Option<PathBuf>,

    /// Result cache directory (default: <task>/cache).
    #[arg(long = "root_cache_dir")]
    pub cache_dir: Option<PathBuf>,

    /// Model identifier.
    #[arg(long = "llm_engine_name")]
    pub model: Option<String>,

    /// Enabled tools, comma or space separated.
    #[arg(long = "enabled_tools")]
    pub enabled_tools: Option<String>,

    /// Data index.
    #[arg(long)]
    pub index: Option<u64>,

    /// Time budget per invocation in seconds.
    #[arg(long = "max_time")]
    pub max_time: Option<u64>,

    /// Output types requested from the solver.
    #[arg(long = "output_types", num_args = 1..)]
    pub output_types: Option<Vec<String>>,

    /// Label used in default log and output directories (default: model id).
    #[arg(long)]
    pub label: Option<String>,

    /// Maximum captured solver output in bytes.
    #[arg(long = "max_output_length")]
    pub max_output_length: Option<usize>,
}

impl ConfigArgs {
    fn to_options(&self) -> ConfigOptions {
        ConfigOptions {
            task: self.task.clone(),
            data_file: self.data_file.clone(),
            log_dir: self.log_dir.clone(),
            output_dir: self.output_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            model: self.model.clone(),
            enabled_tools: self.enabled_tools.as_deref().map(split_list),
            index: self.index,
            max_time_seconds: self.max_time,
            output_types: self.output_types.clone(),
            max_output_length: self.max_output_length,
            label: self.label.clone(),
            force: None,
        }
    }

    /// Layers defaults, config file, environment and flags.
    fn resolve(&self, force: bool) -> Result<RunConfig, ConfigError> {
        let mut options = ConfigOptions::new();
        if let Some(path) = &self.config {
            options = options.merge(ConfigOptions::from_yaml_file(path)?);
        }
        options = options
            .merge(ConfigOptions::from_env()?)
            .merge(self.to_options());
        if force {
            options = options.with_force(true);
        }
        options.resolve()
    }
}

/// How to launch the external solver.
#[derive(clap::Args, Debug, Clone)]
pub struct SolverArgs {
    /// Solver program to invoke.
    #[arg(long, env = "TASKFORGE_SOLVER")]
    pub solver: String,

    /// Argument placed before the launcher flags (repeatable).
    #[arg(long = "solver-arg", allow_hyphen_values = true)]
    pub solver_args: Vec<String>,

    /// Environment variable for the solver as KEY=VALUE (repeatable).
    #[arg(long = "solver-env", value_parser = parse_env_pair)]
    pub solver_env: Vec<(String, String)>,
}

impl SolverArgs {
    fn build(&self) -> CommandSolver {
        self.solver_env.iter().fold(
            CommandSolver::new(&self.solver).with_args(self.solver_args.clone()),
            |solver, (key, value)| solver.with_env(key, value),
        )
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Arguments for `taskforge run`.
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub solver: SolverArgs,

    /// Ignore and overwrite any cached result.
    #[arg(long)]
    pub force: bool,

    /// Print the result as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `taskforge batch`.
#[derive(clap::Args, Debug)]
pub struct BatchArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub solver: SolverArgs,

    /// Data indices, e.g. "0..10", "0..=9", "1,3,5" or combinations.
    #[arg(long, conflicts_with = "index")]
    pub indices: String,

    /// Number of indices to run concurrently.
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Ignore and overwrite any cached result.
    #[arg(long)]
    pub force: bool,

    /// Print the batch report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
///
/// Returns the exit status to report; errors map to one via [`exit_for_error`].
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<RunExit> {
    match cli.command {
        Commands::Run(args) => run_run_command(args).await,
        Commands::Batch(args) => run_batch_command(args).await,
        Commands::Key(args) => run_key_command(args),
        Commands::Show(args) => run_show_command(args),
        Commands::Clear(args) => run_clear_command(args),
        Commands::Models => {
            run_models_command();
            Ok(RunExit::Success)
        }
    }
}

/// Maps an error to the exit status for its kind.
pub fn exit_for_error(err: &anyhow::Error) -> RunExit {
    for cause in err.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return RunExit::Config;
        }
        if let Some(CacheError::Conflict { .. }) = cause.downcast_ref::<CacheError>() {
            return RunExit::CacheConflict;
        }
    }
    RunExit::Internal
}

async fn run_run_command(args: RunArgs) -> anyhow::Result<RunExit> {
    let config = args.config.resolve(args.force)?;
    warn_missing_api_key(&config);

    let orchestrator = build_orchestrator(&config, &args.solver);
    let outcome = orchestrator.execute(&config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    } else {
        println!(
            "{} task={} index={} key={} cached={} duration={:.2}s",
            outcome.result.status,
            outcome.result.task,
            outcome.result.index,
            outcome.result.key.short(),
            outcome.cache_hit,
            outcome.result.duration_seconds
        );
        if !outcome.result.is_success() {
            println!("{}", outcome.result.payload);
        }
    }

    Ok(outcome.exit())
}

async fn run_batch_command(args: BatchArgs) -> anyhow::Result<RunExit> {
    let base = args.config.resolve(args.force)?;
    let indices = parse_indices(&args.indices)?;
    if args.concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            key: "concurrency".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into());
    }
    warn_missing_api_key(&base);

    let orchestrator = build_orchestrator(&base, &args.solver);
    let report = orchestrator
        .execute_batch(&base, &indices, args.concurrency)
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for entry in &report.entries {
            let status = entry
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "error".to_string());
            println!(
                "{:>6}  {:<8} cached={} {}",
                entry.index,
                status,
                entry.cache_hit,
                entry.error.as_deref().unwrap_or("")
            );
        }
        println!(
            "{} succeeded, {} timed out, {} failed ({} cached) of {}",
            report.count(InvocationStatus::Success),
            report.count(InvocationStatus::Timeout),
            report.count(InvocationStatus::Failure),
            report.cache_hits(),
            report.entries.len()
        );
    }

    Ok(report.exit)
}

fn run_key_command(args: ConfigArgs) -> anyhow::Result<RunExit> {
    let config = args.resolve(false)?;
    println!("{}", CacheKey::for_config(&config));
    Ok(RunExit::Success)
}

fn run_show_command(args: ConfigArgs) -> anyhow::Result<RunExit> {
    let config = args.resolve(false)?;
    let key = CacheKey::for_config(&config);
    let cache = ResultCache::open(config.cache_dir());
    match cache.lookup(&key)? {
        Some(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(RunExit::Success)
        }
        None => Err(anyhow::anyhow!(
            "No cached result for key {} in {}",
            key,
            cache.root().display()
        )),
    }
}

fn run_clear_command(args: ConfigArgs) -> anyhow::Result<RunExit> {
    let config = args.resolve(false)?;
    let key = CacheKey::for_config(&config);
    let cache = ResultCache::open(config.cache_dir());
    if cache.remove(&key)? {
        info!(key = %key.short(), "Removed cached result");
        println!("Removed {}", cache.entry_path(&key).display());
    } else {
        println!("No cached result for key {}", key);
    }
    Ok(RunExit::Success)
}

fn run_models_command() {
    for backend in ModelBackend::ALL {
        println!(
            "{:<14} prefixes: {:<22} key: {}",
            backend.display_name(),
            backend.prefixes().join(", "),
            backend.api_key_env().unwrap_or("-")
        );
    }
}

fn build_orchestrator(config: &RunConfig, solver: &SolverArgs) -> Orchestrator {
    let cache = Arc::new(ResultCache::open(config.cache_dir()));
    Orchestrator::new(cache, Arc::new(solver.build()))
}

fn warn_missing_api_key(config: &RunConfig) {
    if let Some(var) = config.backend().api_key_env() {
        if std::env::var_os(var).is_none() {
            warn!(
                model = %config.model(),
                backend = %config.backend(),
                "{} is not set; the solver may fail to reach the model",
                var
            );
        }
    }
}

/// Upper bound on the number of indices one batch may select.
pub const MAX_BATCH_INDICES: u64 = 100_000;

/// Parses an index spec such as "0..10", "0..=9", "1,3,5" or combinations.
///
/// Duplicates are dropped; first occurrence order is kept. At most
/// [`MAX_BATCH_INDICES`] distinct indices may be selected.
pub fn parse_indices(spec: &str) -> Result<Vec<u64>, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "indices".to_string(),
        message,
    };
    let too_many = |raw: &str| {
        invalid(format!(
            "'{}' selects more than {} indices",
            raw, MAX_BATCH_INDICES
        ))
    };
    let number = |raw: &str| {
        raw.trim()
            .parse::<u64>()
            .map_err(|_| invalid(format!("'{}' is not an index", raw)))
    };

    let mut seen = HashSet::new();
    let mut indices = Vec::new();
    for part in split_list(spec) {
        let range = if let Some((start, end)) = part.split_once("..=") {
            number(start)?..=number(end)?
        } else if let Some((start, end)) = part.split_once("..") {
            let (start, end) = (number(start)?, number(end)?);
            if end == start {
                continue;
            }
            if end < start {
                return Err(invalid(format!("range '{}' is reversed", part)));
            }
            start..=end - 1
        } else {
            let index = number(part.as_str())?;
            index..=index
        };

        if range.is_empty() {
            return Err(invalid(format!("range '{}' is reversed", part)));
        }
        let span = (range.end() - range.start()).saturating_add(1);
        if span > MAX_BATCH_INDICES {
            return Err(too_many(part.as_str()));
        }
        for index in range {
            if seen.insert(index) {
                indices.push(index);
            }
        }
        if indices.len() as u64 > MAX_BATCH_INDICES {
            return Err(too_many(spec));
        }
    }

    if indices.is_empty() {
        return Err(invalid(format!("'{}' selects no indices", spec)));
    }
    Ok(indices)
}
