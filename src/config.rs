//! Run configuration resolution.
//!
//! Options are layered, lowest to highest precedence: built-in defaults,
//! an optional YAML config file, `TASKFORGE_*` environment variables, and
//! CLI flags. Each layer is a [`ConfigOptions`] with every field optional;
//! [`ConfigOptions::resolve`] validates the merged result into an immutable
//! [`RunConfig`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::ModelBackend;

/// Default wall-clock budget per invocation, in seconds.
pub const DEFAULT_MAX_TIME_SECS: u64 = 300;

/// Default cap on captured solver output, in bytes.
pub const DEFAULT_MAX_OUTPUT_LENGTH: usize = 100_000;

/// Output type used when none is configured.
pub const DEFAULT_OUTPUT_TYPE: &str = "direct";

/// Prefix for configuration environment variables.
pub const ENV_PREFIX: &str = "TASKFORGE_";

/// One layer of configuration options. Unset fields defer to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOptions {
    pub task: Option<String>,
    pub data_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub enabled_tools: Option<Vec<String>>,
    pub index: Option<u64>,
    pub max_time_seconds: Option<u64>,
    pub output_types: Option<Vec<String>>,
    pub max_output_length: Option<usize>,
    pub label: Option<String>,
    pub force: Option<bool>,
}

impl ConfigOptions {
    /// Creates an empty layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a layer from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Loads a layer from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads a layer from an arbitrary variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
        };

        let mut options = Self::new();
        options.task = var("TASK");
        options.data_file = var("DATA_FILE").map(PathBuf::from);
        options.log_dir = var("LOG_DIR").map(PathBuf::from);
        options.output_dir = var("OUTPUT_DIR").map(PathBuf::from);
        options.cache_dir = var("CACHE_DIR").map(PathBuf::from);
        options.model = var("MODEL");
        options.enabled_tools = var("ENABLED_TOOLS").map(|v| split_list(&v));
        options.output_types = var("OUTPUT_TYPES").map(|v| split_list(&v));
        options.label = var("LABEL");

        if let Some(val) = var("INDEX") {
            options.index = Some(parse_env_value(&val, "TASKFORGE_INDEX")?);
        }
        if let Some(val) = var("MAX_TIME") {
            options.max_time_seconds = Some(parse_env_value(&val, "TASKFORGE_MAX_TIME")?);
        }
        if let Some(val) = var("MAX_OUTPUT_LENGTH") {
            options.max_output_length =
                Some(parse_env_value(&val, "TASKFORGE_MAX_OUTPUT_LENGTH")?);
        }

        Ok(options)
    }

    /// Overlays `higher` on top of `self`; set fields in `higher` win.
    pub fn merge(self, higher: ConfigOptions) -> ConfigOptions {
        ConfigOptions {
            task: higher.task.or(self.task),
            data_file: higher.data_file.or(self.data_file),
            log_dir: higher.log_dir.or(self.log_dir),
            output_dir: higher.output_dir.or(self.output_dir),
            cache_dir: higher.cache_dir.or(self.cache_dir),
            model: higher.model.or(self.model),
            enabled_tools: higher.enabled_tools.or(self.enabled_tools),
            index: higher.index.or(self.index),
            max_time_seconds: higher.max_time_seconds.or(self.max_time_seconds),
            output_types: higher.output_types.or(self.output_types),
            max_output_length: higher.max_output_length.or(self.max_output_length),
            label: higher.label.or(self.label),
            force: higher.force.or(self.force),
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_data_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_file = Some(path.into());
        self
    }

    pub fn with_log_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(path.into());
        self
    }

    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    pub fn with_cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_enabled_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_max_time(mut self, seconds: u64) -> Self {
        self.max_time_seconds = Some(seconds);
        self
    }

    pub fn with_output_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_output_length(mut self, len: usize) -> Self {
        self.max_output_length = Some(len);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = Some(force);
        self
    }

    /// Validates the merged options and applies defaults.
    pub fn resolve(self) -> Result<RunConfig, ConfigError> {
        let task = self
            .task
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingOption("task"))?;
        let data_file = self.data_file.ok_or(ConfigError::MissingOption("data_file"))?;
        let model = self
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .ok_or(ConfigError::MissingOption("model"))?;
        let backend = ModelBackend::resolve(&model)?;

        let label = self
            .label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| default_label(&model));
        let task_root = PathBuf::from(&task);
        let log_dir = self
            .log_dir
            .unwrap_or_else(|| task_root.join("logs").join(&label));
        let output_dir = self
            .output_dir
            .unwrap_or_else(|| task_root.join("results").join(&label));
        let cache_dir = self.cache_dir.unwrap_or_else(|| task_root.join("cache"));

        for (name, path) in [
            ("data_file", &data_file),
            ("log_dir", &log_dir),
            ("output_dir", &output_dir),
            ("cache_dir", &cache_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::EmptyPath(name));
            }
        }

        let max_time_seconds = self.max_time_seconds.unwrap_or(DEFAULT_MAX_TIME_SECS);
        if max_time_seconds == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_time_seconds must be greater than 0".to_string(),
            ));
        }

        let max_output_length = self.max_output_length.unwrap_or(DEFAULT_MAX_OUTPUT_LENGTH);
        if max_output_length == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_output_length must be greater than 0".to_string(),
            ));
        }

        let enabled_tools = normalize_set(self.enabled_tools.unwrap_or_default());
        let mut output_types = normalize_set(self.output_types.unwrap_or_default());
        if output_types.is_empty() {
            output_types.insert(DEFAULT_OUTPUT_TYPE.to_string());
        }

        Ok(RunConfig {
            task,
            data_file,
            log_dir,
            output_dir,
            cache_dir,
            model,
            backend,
            label,
            enabled_tools,
            index: self.index.unwrap_or(0),
            max_time_seconds,
            output_types,
            max_output_length,
            force: self.force.unwrap_or(false),
        })
    }
}

/// Fully resolved, immutable configuration for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    task: String,
    data_file: PathBuf,
    log_dir: PathBuf,
    output_dir: PathBuf,
    cache_dir: PathBuf,
    model: String,
    backend: ModelBackend,
    label: String,
    enabled_tools: BTreeSet<String>,
    index: u64,
    max_time_seconds: u64,
    output_types: BTreeSet<String>,
    max_output_length: usize,
    force: bool,
}

impl RunConfig {
    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend(&self) -> ModelBackend {
        self.backend
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Enabled tools, sorted and deduplicated.
    pub fn enabled_tools(&self) -> &BTreeSet<String> {
        &self.enabled_tools
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn max_time_seconds(&self) -> u64 {
        self.max_time_seconds
    }

    /// The wall-clock budget as a [`Duration`].
    pub fn max_time(&self) -> Duration {
        Duration::from_secs(self.max_time_seconds)
    }

    /// Output types, sorted and deduplicated.
    pub fn output_types(&self) -> &BTreeSet<String> {
        &self.output_types
    }

    pub fn max_output_length(&self) -> usize {
        self.max_output_length
    }

    /// Whether cached results should be bypassed and overwritten.
    pub fn force(&self) -> bool {
        self.force
    }

    /// Returns a copy of this configuration for another data index.
    pub fn for_index(&self, index: u64) -> RunConfig {
        RunConfig {
            index,
            ..self.clone()
        }
    }

    /// Path of the raw transcript for this unit of work.
    pub fn transcript_path(&self) -> PathBuf {
        self.log_dir
            .join(format!("{}_{}.log", sanitize(&self.task), self.index))
    }

    /// Path of the structured result copy for this unit of work.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!("output_{}.json", self.index))
    }
}

/// Splits a comma and/or whitespace separated list, dropping empty items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn normalize_set(items: Vec<String>) -> BTreeSet<String> {
    items
        .iter()
        .flat_map(|item| split_list(item))
        .collect()
}

fn default_label(model: &str) -> String {
    sanitize(model)
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | ':' | '\\' | ' ' => '_',
            other => other,
        })
        .collect()
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("cannot parse '{}'", value),
    })
}
