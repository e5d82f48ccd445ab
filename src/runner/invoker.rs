//! Invoker - runs the solver once per key under the time budget.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::result::{InvocationResult, InvocationState, InvocationStatus};
use crate::cache::CacheKey;
use crate::config::RunConfig;
use crate::error::SolverError;
use crate::solver::{SolveRequest, Solver, SolverOutput};

/// Runs a solver for one unit of work.
#[derive(Clone)]
pub struct Invoker {
    solver: Arc<dyn Solver>,
}

impl Invoker {
    /// Creates an invoker around the given solver.
    pub fn new(solver: Arc<dyn Solver>) -> Self {
        Self { solver }
    }

    /// Runs the solver exactly once for `key`.
    ///
    /// The result is written to the transcript and output paths of `config`
    /// whatever the outcome. No retries are attempted. Launcher errors (the
    /// solver could not be spawned or waited on) are returned instead of
    /// being recorded as an outcome.
    pub async fn run(
        &self,
        config: &RunConfig,
        key: &CacheKey,
    ) -> Result<InvocationResult, SolverError> {
        let request = SolveRequest::from_config(config);
        let mut state = InvocationState::Pending;

        info!(
            task = %config.task(),
            index = config.index(),
            key = %key.short(),
            solver = %self.solver.name(),
            budget_secs = config.max_time_seconds(),
            "Starting invocation"
        );

        advance(&mut state, InvocationState::Running);
        let start = Instant::now();
        let outcome = tokio::time::timeout(config.max_time(), self.solver.solve(&request)).await;
        let duration = start.elapsed();

        let (payload, exit_code, transcript) = match outcome {
            Ok(Ok(output)) => {
                advance(&mut state, InvocationState::Completed);
                let transcript = render_output(&output);
                (output.stdout, output.exit_code, transcript)
            }
            Ok(Err(e)) if e.is_launch_error() => {
                error!(task = %config.task(), index = config.index(), error = %e, "Could not launch solver");
                return Err(e);
            }
            Ok(Err(e)) => {
                advance(&mut state, InvocationState::Crashed);
                error!(task = %config.task(), index = config.index(), error = %e, "Solver failed");
                (e.to_string(), e.exit_code(), render_error(&e))
            }
            Err(_) => {
                // Dropping the solve future cancels the solver.
                advance(&mut state, InvocationState::TimedOut);
                warn!(
                    task = %config.task(),
                    index = config.index(),
                    budget_secs = config.max_time_seconds(),
                    "Solver exceeded time budget"
                );
                let detail = format!(
                    "Execution timed out after {} seconds",
                    config.max_time_seconds()
                );
                let transcript = format!("{}\n", detail);
                (detail, None, transcript)
            }
        };

        debug_assert!(state.is_terminal(), "invocation ended in state {}", state);
        let status = state.status().unwrap_or(InvocationStatus::Failure);
        let result = InvocationResult::new(config, key.clone(), status, payload, duration)
            .with_exit_code(exit_code);

        info!(
            task = %config.task(),
            index = config.index(),
            status = %result.status,
            duration_secs = result.duration_seconds,
            "Invocation finished"
        );

        // Try to save even failed results
        if let Err(e) = write_transcript(config, &request, &result, &transcript) {
            warn!(path = %config.transcript_path().display(), error = %e, "Failed to write transcript");
        }
        if let Err(e) = write_output_copy(config, &result) {
            warn!(path = %config.output_path().display(), error = %e, "Failed to write result");
        }

        Ok(result)
    }
}

fn advance(state: &mut InvocationState, next: InvocationState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal invocation transition {} -> {}",
        state,
        next
    );
    debug!(from = %state, to = %next, "Invocation state");
    *state = next;
}

fn render_output(output: &SolverOutput) -> String {
    let mut transcript = String::new();
    transcript.push_str("--- stdout ---\n");
    transcript.push_str(&output.stdout);
    if !output.stderr.is_empty() {
        transcript.push_str("\n--- stderr ---\n");
        transcript.push_str(&output.stderr);
    }
    transcript.push('\n');
    transcript
}

fn render_error(err: &SolverError) -> String {
    match err {
        SolverError::Crashed { stderr, .. } => {
            format!("{}\n--- stderr ---\n{}\n", err, stderr)
        }
        other => format!("{}\n", other),
    }
}

fn write_transcript(
    config: &RunConfig,
    request: &SolveRequest,
    result: &InvocationResult,
    body: &str,
) -> std::io::Result<()> {
    let path = config.transcript_path();
    ensure_parent(&path)?;

    let header = format!(
        "run_id: {}\nkey: {}\ntask: {}\nindex: {}\nmodel: {}\ndata_file: {}\nenabled_tools: {}\noutput_types: {}\nstatus: {}\nduration_seconds: {:.3}\n\n",
        result.run_id,
        result.key,
        request.task,
        request.index,
        request.model,
        request.data_file.display(),
        request.enabled_tools.join(","),
        request.output_types.join(","),
        result.status,
        result.duration_seconds,
    );
    fs::write(&path, format!("{}{}", header, body))?;
    debug!("Saved transcript to {}", path.display());
    Ok(())
}

/// Writes the structured copy of `result` to the output directory.
pub(crate) fn write_output_copy(
    config: &RunConfig,
    result: &InvocationResult,
) -> std::io::Result<()> {
    let path = config.output_path();
    ensure_parent(&path)?;
    let json = serde_json::to_string_pretty(result)?;
    fs::write(&path, json)?;
    debug!("Saved result to {}", path.display());
    Ok(())
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOptions;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedSolver(Result<&'static str, &'static str>);

    #[async_trait]
    impl Solver for FixedSolver {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn solve(&self, _request: &SolveRequest) -> Result<SolverOutput, SolverError> {
            match self.0 {
                Ok(out) => Ok(SolverOutput::from_stdout(out)),
                Err(msg) => Err(SolverError::Crashed {
                    code: Some(1),
                    stderr: msg.to_string(),
                }),
            }
        }
    }

    struct SleepySolver(Duration);

    #[async_trait]
    impl Solver for SleepySolver {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn solve(&self, _request: &SolveRequest) -> Result<SolverOutput, SolverError> {
            tokio::time::sleep(self.0).await;
            Ok(SolverOutput::from_stdout("late"))
        }
    }

    fn config(dir: &Path, max_time: u64) -> RunConfig {
        ConfigOptions::new()
            .with_task("demo")
            .with_data_file("demo/data.json")
            .with_model("gpt-4o")
            .with_max_time(max_time)
            .with_log_dir(dir.join("logs"))
            .with_output_dir(dir.join("out"))
            .with_cache_dir(dir.join("cache"))
            .resolve()
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_writes_artifacts() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), 2);
        let key = CacheKey::for_config(&config);

        let result = Invoker::new(Arc::new(FixedSolver(Ok("42"))))
            .run(&config, &key)
            .await
            .unwrap();

        assert_eq!(result.status, InvocationStatus::Success);
        assert_eq!(result.payload, "42");

        let transcript = fs::read_to_string(config.transcript_path()).unwrap();
        assert!(transcript.contains("status: success"));
        assert!(transcript.contains("42"));

        let copy: InvocationResult =
            serde_json::from_str(&fs::read_to_string(config.output_path()).unwrap()).unwrap();
        assert_eq!(copy, result);
    }

    #[tokio::test]
    async fn test_crash_is_failure() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), 2);
        let key = CacheKey::for_config(&config);

        let result = Invoker::new(Arc::new(FixedSolver(Err("segfault"))))
            .run(&config, &key)
            .await
            .unwrap();

        assert_eq!(result.status, InvocationStatus::Failure);
        assert!(result.payload.contains("segfault"));
        assert_eq!(result.exit_code, Some(1));
        assert!(config.output_path().exists());
    }

    #[tokio::test]
    async fn test_timeout() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), 1);
        let key = CacheKey::for_config(&config);

        let start = Instant::now();
        let result = Invoker::new(Arc::new(SleepySolver(Duration::from_secs(5))))
            .run(&config, &key)
            .await
            .unwrap();

        assert_eq!(result.status, InvocationStatus::Timeout);
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(result.payload.contains("timed out after 1 seconds"));
        let transcript = fs::read_to_string(config.transcript_path()).unwrap();
        assert!(transcript.contains("status: timeout"));
    }

    struct UnlaunchableSolver;

    #[async_trait]
    impl Solver for UnlaunchableSolver {
        fn name(&self) -> &str {
            "unlaunchable"
        }

        async fn solve(&self, _request: &SolveRequest) -> Result<SolverOutput, SolverError> {
            Err(SolverError::Spawn {
                program: "/nonexistent/solver".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    #[tokio::test]
    async fn test_launch_error_is_not_an_outcome() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), 2);
        let key = CacheKey::for_config(&config);

        let err = Invoker::new(Arc::new(UnlaunchableSolver))
            .run(&config, &key)
            .await
            .unwrap_err();

        assert!(matches!(err, SolverError::Spawn { .. }));
        assert!(!config.output_path().exists());
        assert!(!config.transcript_path().exists());
    }
}
