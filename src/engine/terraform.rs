//! Terraform CLI engine.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{EngineOp, EngineOutput, EngineRequest, InfraEngine};

/// Engine that runs the `terraform` binary.
pub struct TerraformEngine {
    /// Path to the terraform binary.
    binary: String,
    /// Per-command timeout. `None` waits indefinitely.
    timeout: Option<Duration>,
}

impl Default for TerraformEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TerraformEngine {
    /// Creates an engine using the default `terraform` command.
    pub fn new() -> Self {
        Self {
            binary: "terraform".to_string(),
            timeout: None,
        }
    }

    /// Creates an engine with a custom binary path.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: None,
        }
    }

    /// Sets the per-command timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the command arguments for an operation.
    fn build_args(&self, op: EngineOp, request: &EngineRequest) -> Vec<String> {
        let mut args = vec![op.as_str().to_string()];

        match op {
            EngineOp::Init => {
                args.push("-input=false".to_string());
                args.push("-upgrade=false".to_string());
            }
            EngineOp::Plan => {
                args.push("-input=false".to_string());
                args.push("-lock=false".to_string());
            }
            EngineOp::Apply | EngineOp::Destroy => {
                args.push("-input=false".to_string());
                args.push("-auto-approve".to_string());
                args.push("-lock=false".to_string());
            }
            EngineOp::Output => {
                args.push("-json".to_string());
            }
        }
        args.push("-no-color".to_string());

        if op.takes_vars() {
            for (name, value) in &request.vars {
                args.push("-var".to_string());
                args.push(format!("{}={}", name, value));
            }
        }

        args
    }
}

#[async_trait]
impl InfraEngine for TerraformEngine {
    async fn run(&self, op: EngineOp, request: &EngineRequest) -> Result<EngineOutput> {
        let args = self.build_args(op, request);

        tracing::debug!(
            binary = %self.binary,
            module = ?request.module_dir,
            args = ?args,
            "running terraform"
        );

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .current_dir(&request.module_dir)
            .envs(&request.env)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out apply must not keep writing state behind teardown.
            .kill_on_drop(true);

        let output = command.output();
        let output = match self.timeout {
            Some(after) => tokio::time::timeout(after, output).await.map_err(|_| {
                Error::EngineTimeout {
                    command: format!("{} {}", self.binary, op),
                    after,
                }
            })?,
            None => output.await,
        }
        .map_err(|e| Error::Engine(format!("failed to run {} {}: {}", self.binary, op, e)))?;

        let result = EngineOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        if !result.succeeded() {
            tracing::debug!(
                module = ?request.module_dir,
                op = %op,
                exit_code = ?result.exit_code,
                "terraform reported failure"
            );
        }

        Ok(result)
    }

    fn name(&self) -> &str {
        "terraform"
    }
}
