//! Plan-only checks against valid module variants.

use crate::context::ModuleBinding;
use crate::error::{Error, Result};
use crate::invoker::ModuleInvoker;

/// Runs plans that are expected to succeed.
pub struct PlanRunner {
    invoker: ModuleInvoker,
}

impl PlanRunner {
    pub fn new(invoker: ModuleInvoker) -> Self {
        Self { invoker }
    }

    /// Plans `binding`; a failed plan carries the engine output verbatim.
    pub async fn run_plan(&self, binding: &ModuleBinding) -> Result<()> {
        let outcome = self.invoker.plan_only(binding).await;
        match outcome.error {
            None => {
                tracing::info!(module = ?binding.module_dir, "plan succeeded");
                Ok(())
            }
            Some(Error::PlanFailure { module, .. }) => Err(Error::PlanFailure {
                module,
                output: outcome.output,
            }),
            Some(e) => Err(e),
        }
    }
}
