//! Error types for taskforge operations.
//!
//! Defines error types for the major subsystems:
//! - Configuration resolution and validation
//! - Result cache storage
//! - External solver invocation

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving a run configuration.
///
/// Any of these aborts the run before the solver is contacted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required option '{0}'")]
    MissingOption(&'static str),

    #[error("Option '{0}' must not be an empty path")]
    EmptyPath(&'static str),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown model '{model}': supported prefixes are {supported}")]
    UnknownModel { model: String, supported: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur during result cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache entry for key {key} already exists (use --force to overwrite)")]
    Conflict { key: String },

    #[error("Corrupt cache entry at '{path}': {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cache IO error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Result for key {actual} cannot be stored under key {expected}")]
    KeyMismatch { expected: String, actual: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors reported by a solver for a single invocation.
///
/// A timeout is not a solver error: the invoker enforces the budget and
/// records it as a distinct outcome.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Failed to spawn solver '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Solver exited with {}: {stderr}", exit_label(.code))]
    Crashed { code: Option<i32>, stderr: String },

    #[error("Solver returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SolverError {
    /// True if the solver never ran to completion because the launcher could
    /// not start or wait on it. Such errors are not solver outcomes.
    pub fn is_launch_error(&self) -> bool {
        matches!(self, SolverError::Spawn { .. } | SolverError::Io(_))
    }

    /// Exit code of the solver process, if it terminated with one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            SolverError::Crashed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Errors that abort one unit of work before a result is recorded.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to launch solver")]
    Launch(#[source] SolverError),

    #[error("Result cache operation failed")]
    Cache(#[from] CacheError),
}

impl RunError {
    /// True if another writer already stored a result for the key.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RunError::Cache(CacheError::Conflict { .. }))
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}
