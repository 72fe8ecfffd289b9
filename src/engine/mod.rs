//! Infrastructure engine abstraction.
//!
//! The harness drives module variants through an [`InfraEngine`]. The
//! production implementation shells out to the Terraform CLI.

mod terraform;

#[cfg(test)]
pub(crate) mod scripted;

pub use terraform::TerraformEngine;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::context::ModuleBinding;
use crate::error::Result;

/// A single engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    /// Initialize the working directory (providers, modules, backend).
    Init,
    /// Compute a plan without changing resources.
    Plan,
    /// Apply the module.
    Apply,
    /// Destroy everything the module created.
    Destroy,
    /// Print all published outputs as JSON.
    Output,
}

impl EngineOp {
    /// Returns the CLI subcommand for this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineOp::Init => "init",
            EngineOp::Plan => "plan",
            EngineOp::Apply => "apply",
            EngineOp::Destroy => "destroy",
            EngineOp::Output => "output",
        }
    }

    /// Whether the operation takes module input variables.
    pub fn takes_vars(&self) -> bool {
        matches!(self, EngineOp::Plan | EngineOp::Apply | EngineOp::Destroy)
    }
}

impl fmt::Display for EngineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs for one engine command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    /// Module working directory.
    pub module_dir: PathBuf,
    /// Input variables.
    pub vars: BTreeMap<String, String>,
    /// Extra environment variables for the engine process.
    pub env: BTreeMap<String, String>,
}

impl From<&ModuleBinding> for EngineRequest {
    fn from(binding: &ModuleBinding) -> Self {
        Self {
            module_dir: binding.module_dir.clone(),
            vars: binding.vars(),
            env: binding.env(),
        }
    }
}

/// Output of one engine command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Standard output text.
    pub stdout: String,
    /// Standard error text.
    pub stderr: String,
    /// Process exit code, if it exited normally.
    pub exit_code: Option<i32>,
}

impl EngineOutput {
    /// Creates a successful output with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    /// Creates a failed output with the given diagnostic on stderr.
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(1),
        }
    }

    /// Returns true if the command exited with status zero.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Returns stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Trait for infrastructure engines.
#[async_trait]
pub trait InfraEngine: Send + Sync {
    /// Runs `op` against the request's module directory.
    ///
    /// A non-zero exit is reported through [`EngineOutput::exit_code`], not as
    /// an error. Errors are reserved for failing to run the engine at all.
    async fn run(&self, op: EngineOp, request: &EngineRequest) -> Result<EngineOutput>;

    /// Returns the name of this engine.
    fn name(&self) -> &str;
}
