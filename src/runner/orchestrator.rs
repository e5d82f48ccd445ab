//! Orchestrator - cache short-circuit, invocation and reporting.
//!
//! ```text
//! RunConfig → CacheKey → ResultCache::lookup ─hit─→ Outcome (cached)
//!                                 └─miss─→ Invoker::run → ResultCache::store → Outcome
//! ```

use std::fs;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::invoker::{write_output_copy, Invoker};
use super::result::{InvocationResult, InvocationStatus};
use crate::cache::{CacheKey, ResultCache};
use crate::config::RunConfig;
use crate::error::{CacheError, RunError};
use crate::solver::Solver;

/// Process exit status, one distinct code per error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunExit {
    Success,
    /// I/O or cache storage failure.
    Internal,
    Config,
    Timeout,
    Failure,
    CacheConflict,
}

impl RunExit {
    /// Numeric process exit code.
    pub fn code(self) -> u8 {
        match self {
            RunExit::Success => 0,
            RunExit::Internal => 1,
            RunExit::Config => 2,
            RunExit::Timeout => 3,
            RunExit::Failure => 4,
            RunExit::CacheConflict => 5,
        }
    }

    /// Ranking used to pick the most severe outcome of a batch.
    fn severity(self) -> u8 {
        match self {
            RunExit::Success => 0,
            RunExit::Timeout => 1,
            RunExit::Failure => 2,
            RunExit::CacheConflict => 3,
            RunExit::Internal => 4,
            RunExit::Config => 5,
        }
    }

    /// The more severe of two outcomes.
    pub fn worst(self, other: RunExit) -> RunExit {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl From<InvocationStatus> for RunExit {
    fn from(status: InvocationStatus) -> Self {
        match status {
            InvocationStatus::Success => RunExit::Success,
            InvocationStatus::Timeout => RunExit::Timeout,
            InvocationStatus::Failure => RunExit::Failure,
        }
    }
}

/// Result of executing one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub result: InvocationResult,
    /// True if the result came from the cache and the solver was not called.
    pub cache_hit: bool,
}

impl Outcome {
    pub fn exit(&self) -> RunExit {
        self.result.status.into()
    }
}

/// Per-index line of a batch report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub index: u64,
    pub key: CacheKey,
    pub status: Option<InvocationStatus>,
    pub cache_hit: bool,
    pub duration_seconds: Option<f64>,
    pub error: Option<String>,
    pub exit: RunExit,
}

/// Summary of a batch run, written to `summary.json` in the output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub task: String,
    pub model: String,
    pub entries: Vec<BatchEntry>,
    pub exit: RunExit,
}

impl BatchReport {
    pub fn count(&self, status: InvocationStatus) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == Some(status))
            .count()
    }

    pub fn cache_hits(&self) -> usize {
        self.entries.iter().filter(|e| e.cache_hit).count()
    }
}

/// Ties cache, invoker and reporting together.
pub struct Orchestrator {
    cache: Arc<ResultCache>,
    invoker: Invoker,
}

impl Orchestrator {
    pub fn new(cache: Arc<ResultCache>, solver: Arc<dyn Solver>) -> Self {
        Self {
            cache,
            invoker: Invoker::new(solver),
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Executes one unit of work, short-circuiting on a cached result.
    ///
    /// A solver that cannot be launched yields [`RunError::Launch`] and
    /// leaves the cache untouched.
    pub async fn execute(&self, config: &RunConfig) -> Result<Outcome, RunError> {
        let key = CacheKey::for_config(config);

        if !config.force() {
            if let Some(cached) = self.cache.lookup(&key)? {
                info!(
                    task = %config.task(),
                    index = config.index(),
                    key = %key.short(),
                    status = %cached.status,
                    "Using cached result"
                );
                if !config.output_path().exists() {
                    if let Err(e) = write_output_copy(config, &cached) {
                        warn!(error = %e, "Failed to write result copy");
                    }
                }
                return Ok(Outcome {
                    result: cached,
                    cache_hit: true,
                });
            }
        }

        let result = self
            .invoker
            .run(config, &key)
            .await
            .map_err(RunError::Launch)?;

        match self.cache.store(&key, &result, config.force()) {
            Ok(()) => Ok(Outcome {
                result,
                cache_hit: false,
            }),
            Err(CacheError::Conflict { .. }) => {
                // Another writer stored this key while we ran; the first entry wins.
                warn!(key = %key.short(), "Result already cached by a concurrent run");
                match self.cache.lookup(&key)? {
                    Some(stored) => {
                        if let Err(e) = write_output_copy(config, &stored) {
                            warn!(error = %e, "Failed to write result copy");
                        }
                        Ok(Outcome {
                            result: stored,
                            cache_hit: true,
                        })
                    }
                    None => Ok(Outcome {
                        result,
                        cache_hit: false,
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Executes every index of `base`, at most `concurrency` at a time.
    ///
    /// Each index's outcome is independent: a timeout, failure or cache error
    /// for one index is recorded and the batch carries on.
    pub async fn execute_batch(
        &self,
        base: &RunConfig,
        indices: &[u64],
        concurrency: usize,
    ) -> BatchReport {
        info!(
            task = %base.task(),
            count = indices.len(),
            concurrency,
            "Starting batch"
        );

        let entries = if concurrency <= 1 {
            let mut entries = Vec::with_capacity(indices.len());
            for &index in indices {
                entries.push(self.execute_entry(base.for_index(index)).await);
            }
            entries
        } else {
            let sem = Arc::new(Semaphore::new(concurrency));
            let futures = indices.iter().map(|&index| {
                let sem = Arc::clone(&sem);
                let config = base.for_index(index);
                async move {
                    let _permit = sem.acquire().await.ok();
                    self.execute_entry(config).await
                }
            });
            futures::future::join_all(futures).await
        };

        let exit = entries
            .iter()
            .fold(RunExit::Success, |worst, entry| worst.worst(entry.exit));
        let report = BatchReport {
            task: base.task().to_string(),
            model: base.model().to_string(),
            entries,
            exit,
        };

        if let Err(e) = write_summary(base, &report) {
            warn!(error = %e, "Failed to write batch summary");
        }

        info!(
            task = %report.task,
            success = report.count(InvocationStatus::Success),
            timeout = report.count(InvocationStatus::Timeout),
            failure = report.count(InvocationStatus::Failure),
            cache_hits = report.cache_hits(),
            exit = report.exit.code(),
            "Batch finished"
        );
        report
    }

    async fn execute_entry(&self, config: RunConfig) -> BatchEntry {
        let key = CacheKey::for_config(&config);
        match self.execute(&config).await {
            Ok(outcome) => BatchEntry {
                index: config.index(),
                key,
                status: Some(outcome.result.status),
                cache_hit: outcome.cache_hit,
                duration_seconds: Some(outcome.result.duration_seconds),
                error: None,
                exit: outcome.exit(),
            },
            Err(e) => {
                let exit = if e.is_conflict() {
                    RunExit::CacheConflict
                } else {
                    RunExit::Internal
                };
                let message = format!("{:#}", anyhow::Error::new(e));
                error!(index = config.index(), error = %message, "Unit of work aborted");
                BatchEntry {
                    index: config.index(),
                    key,
                    status: None,
                    cache_hit: false,
                    duration_seconds: None,
                    error: Some(message),
                    exit,
                }
            }
        }
    }
}

fn write_summary(base: &RunConfig, report: &BatchReport) -> std::io::Result<()> {
    fs::create_dir_all(base.output_dir())?;
    let path = base.output_dir().join("summary.json");
    fs::write(&path, serde_json::to_string_pretty(report)?)?;
    debug!("Saved batch summary to {}", path.display());
    Ok(())
}
