//! Full apply/inspect/destroy lifecycle of a module variant.

use std::panic;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::ModuleBinding;
use crate::error::{Error, Result};
use crate::invoker::ModuleInvoker;
use crate::outputs::ResourceDescriptor;
use crate::teardown::Teardown;

/// Which published resource proves the apply worked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCheck {
    /// Output holding the resource map.
    #[serde(default = "default_output")]
    pub output: String,
    /// Logical resource name inside that map.
    #[serde(default = "default_resource")]
    pub resource: String,
}

fn default_output() -> String {
    "map".to_string()
}

fn default_resource() -> String {
    "k8nodes".to_string()
}

impl Default for ResourceCheck {
    fn default() -> Self {
        Self {
            output: default_output(),
            resource: default_resource(),
        }
    }
}

/// Runs integration lifecycles.
pub struct IntegrationRunner {
    invoker: ModuleInvoker,
    teardown: Option<Arc<Teardown>>,
}

impl IntegrationRunner {
    /// Creates a runner over the given invoker.
    pub fn new(invoker: ModuleInvoker) -> Self {
        Self {
            invoker,
            teardown: None,
        }
    }

    /// Registers live modules with `teardown` so an interrupt destroys them.
    pub fn with_teardown(mut self, teardown: Arc<Teardown>) -> Self {
        self.teardown = Some(teardown);
        self
    }

    /// Applies `binding`, checks the published resource, then destroys.
    ///
    /// Destroy always runs once apply has been attempted: after a failed
    /// apply, a failed output read, or a panic anywhere in those steps. The
    /// steps run as their own task so a panic surfaces as a [`JoinError`]
    /// here instead of unwinding past the destroy; it is re-raised once the
    /// module is gone. If both the lifecycle and the destroy fail, the
    /// lifecycle error wins and the destroy error is logged.
    ///
    /// [`JoinError`]: tokio::task::JoinError
    pub async fn run_integration(
        &self,
        binding: &ModuleBinding,
        check: &ResourceCheck,
    ) -> Result<ResourceDescriptor> {
        if let Some(teardown) = &self.teardown {
            teardown.track(binding.clone());
        }

        let task = {
            let invoker = self.invoker.clone();
            let binding = binding.clone();
            let check = check.clone();
            tokio::spawn(async move { exercise(&invoker, &binding, &check).await })
        };
        let joined = task.await;

        let destroyed = self.invoker.destroy(binding).await;
        if destroyed.is_ok() {
            if let Some(teardown) = &self.teardown {
                teardown.release(binding);
            }
        }

        let outcome = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                if let Err(destroy_err) = &destroyed {
                    tracing::error!(error = %destroy_err, module = ?binding.module_dir, "destroy after panic failed");
                }
                panic::resume_unwind(e.into_panic());
            }
            Err(e) => Err(Error::Engine(format!(
                "lifecycle of {} did not complete: {}",
                binding.module_dir.display(),
                e
            ))),
        };

        match (outcome, destroyed) {
            (Ok(subnet), Ok(())) => Ok(subnet),
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(destroy_err)) => {
                tracing::warn!(
                    error = %destroy_err,
                    module = ?binding.module_dir,
                    "destroy failed after lifecycle failure"
                );
                Err(e)
            }
        }
    }
}

/// Apply, read outputs and look up the checked resource.
async fn exercise(
    invoker: &ModuleInvoker,
    binding: &ModuleBinding,
    check: &ResourceCheck,
) -> Result<ResourceDescriptor> {
    invoker.apply_and_wait(binding).await?;
    let outputs = invoker.read_all_outputs(binding).await?;
    let resource = outputs.require_resource(&check.output, &check.resource)?;

    tracing::info!(
        module = ?binding.module_dir,
        resource = %check.resource,
        id = %resource.id,
        "resource present"
    );
    Ok(resource)
}
