//! Command-line solver.
//!
//! Runs an external program with fixed leading arguments followed by the
//! launcher flags for the unit of work. Stdout, minus one trailing line
//! terminator, is the result payload.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{SolveRequest, Solver, SolverOutput};
use crate::error::SolverError;

/// Solver that spawns an external program per invocation.
#[derive(Debug, Clone)]
pub struct CommandSolver {
    /// Program to run.
    program: String,
    /// Arguments placed before the launcher flags.
    args: Vec<String>,
    /// Extra environment variables.
    env_vars: Vec<(String, String)>,
}

impl CommandSolver {
    /// Creates a solver for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: Vec::new(),
        }
    }

    /// Sets the leading arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    fn command(&self, request: &SolveRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).args(request.launcher_args());

        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        // The child must not outlive a cancelled invocation.
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl Solver for CommandSolver {
    fn name(&self) -> &str {
        &self.program
    }

    async fn solve(&self, request: &SolveRequest) -> Result<SolverOutput, SolverError> {
        let mut cmd = self.command(request);

        info!(
            program = %self.program,
            task = %request.task,
            index = request.index,
            "Starting solver"
        );

        let child = cmd.spawn().map_err(|source| SolverError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let output = child.wait_with_output().await?;

        let exit_code = output.status.code();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        debug!(?exit_code, "Solver exited");

        if !output.status.success() {
            return Err(SolverError::Crashed {
                code: exit_code,
                stderr,
            });
        }

        let mut stdout = String::from_utf8(output.stdout).map_err(|e| {
            SolverError::MalformedOutput(format!("stdout is not valid UTF-8: {}", e))
        })?;
        strip_line_terminator(&mut stdout);

        Ok(SolverOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

/// Removes one trailing `\n` or `\r\n`, as a shell `$(...)` would.
fn strip_line_terminator(s: &mut String) {
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
}
