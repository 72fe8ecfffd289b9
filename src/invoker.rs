//! Module invoker: runs plan, apply, destroy and output reads for a binding.

use std::sync::Arc;

use serde_json::Value;

use crate::context::ModuleBinding;
use crate::engine::{EngineOp, EngineOutput, EngineRequest, InfraEngine};
use crate::error::{Error, Result};
use crate::outputs::ModuleOutputs;

/// Outcome of a plan-only invocation.
///
/// The raw text is kept even when the plan fails so callers can inspect the
/// engine's diagnostics.
#[derive(Debug)]
pub struct PlanOutcome {
    /// Combined init and plan output.
    pub output: String,
    /// Set when init or plan reported a non-zero status.
    pub error: Option<Error>,
}

impl PlanOutcome {
    /// Returns true if the plan succeeded.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Thin adapter over an [`InfraEngine`].
#[derive(Clone)]
pub struct ModuleInvoker {
    engine: Arc<dyn InfraEngine>,
}

impl ModuleInvoker {
    /// Creates an invoker over the given engine.
    pub fn new(engine: Arc<dyn InfraEngine>) -> Self {
        Self { engine }
    }

    /// Returns the name of the underlying engine.
    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Initializes then plans the module.
    pub async fn plan_only(&self, binding: &ModuleBinding) -> PlanOutcome {
        let request = EngineRequest::from(binding);
        let mut output = String::new();

        for op in [EngineOp::Init, EngineOp::Plan] {
            match self.engine.run(op, &request).await {
                Ok(result) => {
                    push_text(&mut output, &result);
                    if !result.succeeded() {
                        return PlanOutcome {
                            error: Some(Error::PlanFailure {
                                module: binding.module_dir.clone(),
                                output: output.clone(),
                            }),
                            output,
                        };
                    }
                }
                Err(e) => {
                    return PlanOutcome {
                        output,
                        error: Some(e),
                    };
                }
            }
        }

        PlanOutcome {
            output,
            error: None,
        }
    }

    /// Initializes then applies the module, failing fast on either step.
    pub async fn apply_and_wait(&self, binding: &ModuleBinding) -> Result<()> {
        tracing::info!(
            module = ?binding.module_dir,
            region = %binding.region,
            "applying module"
        );

        let request = EngineRequest::from(binding);
        for op in [EngineOp::Init, EngineOp::Apply] {
            let result = self.engine.run(op, &request).await?;
            if !result.succeeded() {
                return Err(Error::ApplyFailure {
                    module: binding.module_dir.clone(),
                    output: result.combined(),
                });
            }
        }

        Ok(())
    }

    /// Destroys everything the module created.
    ///
    /// An empty or never-applied module destroys cleanly; the engine treats
    /// absent resources as nothing to do.
    pub async fn destroy(&self, binding: &ModuleBinding) -> Result<()> {
        tracing::info!(module = ?binding.module_dir, "destroying module");

        let request = EngineRequest::from(binding);
        for op in [EngineOp::Init, EngineOp::Destroy] {
            let result = self.engine.run(op, &request).await?;
            if !result.succeeded() {
                return Err(Error::DestroyFailure {
                    module: binding.module_dir.clone(),
                    output: result.combined(),
                });
            }
        }

        Ok(())
    }

    /// Reads every published output.
    pub async fn read_all_outputs(&self, binding: &ModuleBinding) -> Result<ModuleOutputs> {
        let request = EngineRequest::from(binding);
        let result = self.engine.run(EngineOp::Output, &request).await?;
        if !result.succeeded() {
            return Err(Error::MalformedOutput {
                module: binding.module_dir.clone(),
                name: "*".to_string(),
                reason: result.combined(),
            });
        }

        ModuleOutputs::from_json(&binding.module_dir, &result.stdout)
    }

    /// Reads one published output.
    pub async fn read_output(&self, binding: &ModuleBinding, name: &str) -> Result<Value> {
        let outputs = self.read_all_outputs(binding).await?;
        outputs.require(name).cloned()
    }

    /// Reads one output that must be a non-empty string.
    pub async fn read_required_string(&self, binding: &ModuleBinding, name: &str) -> Result<String> {
        let outputs = self.read_all_outputs(binding).await?;
        outputs.require_string(name).map(str::to_string)
    }
}

fn push_text(buffer: &mut String, result: &EngineOutput) {
    let text = result.combined();
    if text.is_empty() {
        return;
    }
    if !buffer.is_empty() {
        buffer.push('\n');
    }
    buffer.push_str(&text);
}
