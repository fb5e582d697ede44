use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ToolAdapter, ToolInput};
use crate::error::{OrchestratorError, Result};

const TARGET_PLACEHOLDER: &str = "{target}";

/// Runs an external binary once per target. Every non-empty stdout line
/// becomes one string result.
#[derive(Clone, Debug)]
pub struct CommandTool {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandTool {
    /// `args` may contain `{target}`, replaced with the current target.
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    /// `subfinder -silent -d <target>`
    pub fn subfinder(program: impl Into<String>) -> Self {
        Self::new("subfinder", program, &["-silent", "-d", TARGET_PLACEHOLDER])
    }

    fn build(&self, target: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(
            self.args
                .iter()
                .map(|arg| arg.replace(TARGET_PLACEHOLDER, target)),
        )
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        cmd
    }

    async fn run_target(&self, cancel: &CancellationToken, target: &str) -> Result<Vec<Value>> {
        let child = self.build(target).spawn().map_err(|e| {
            OrchestratorError::tool(&self.name, format!("failed to spawn {}: {e}", self.program))
        })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(OrchestratorError::Cancelled(format!("{} for {target}", self.name)));
            }
            output = child.wait_with_output() => output.map_err(|e| {
                OrchestratorError::tool(&self.name, format!("failed to wait for {}: {e}", self.program))
            })?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt = stderr.lines().take(10).collect::<Vec<_>>().join("\n");
            return Err(OrchestratorError::tool(
                &self.name,
                format!(
                    "{} exited with status {}: {excerpt}",
                    self.program,
                    output.status.code().unwrap_or(-1)
                ),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| Value::String(line.to_string()))
            .collect())
    }
}

#[async_trait]
impl ToolAdapter for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cancel: &CancellationToken, input: &ToolInput) -> Result<Vec<Value>> {
        if input.targets.is_empty() {
            return Err(OrchestratorError::tool(&self.name, "job has no targets"));
        }

        let mut results = Vec::new();
        for target in &input.targets {
            debug!(target: "orchestrator::executor", job_id = %input.job_id, tool = %self.name, %target, "running command");
            let found = self.run_target(cancel, target).await?;
            info!(
                target: "orchestrator::executor",
                job_id = %input.job_id,
                tool = %self.name,
                %target,
                results = found.len(),
                "command finished"
            );
            results.extend(found);
        }
        Ok(results)
    }
}
