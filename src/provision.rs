//! Prerequisite provisioning: applies the bootstrap module once per run.

use crate::context::{ModuleBinding, PrerequisiteIdentities};
use crate::error::{Error, Result};
use crate::invoker::ModuleInvoker;

/// Output names read from the bootstrap module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteOutputs {
    /// Output holding the reader identity.
    pub reader: String,
    /// Output holding the owner identity.
    pub owner: String,
}

impl Default for PrerequisiteOutputs {
    fn default() -> Self {
        Self {
            reader: "sa_reader_email".to_string(),
            owner: "sa_owner_email".to_string(),
        }
    }
}

/// Applies the bootstrap module and captures the identities it publishes.
///
/// Does not guard against repeated calls; the coordinator provisions once and
/// [`crate::context::RunContext::with_prerequisites`] rejects a second write.
pub struct PrerequisiteProvisioner {
    invoker: ModuleInvoker,
    outputs: PrerequisiteOutputs,
}

impl PrerequisiteProvisioner {
    /// Creates a provisioner reading the given output names.
    pub fn new(invoker: ModuleInvoker, outputs: PrerequisiteOutputs) -> Self {
        Self { invoker, outputs }
    }

    /// Applies `binding` and reads both identities.
    ///
    /// Every failure is fatal and wrapped as [`Error::Provisioning`]; nothing
    /// is retried.
    pub async fn provision(&self, binding: &ModuleBinding) -> Result<PrerequisiteIdentities> {
        tracing::info!(
            module = ?binding.module_dir,
            region = %binding.region,
            environment = %binding.environment,
            "provisioning prerequisites"
        );

        self.invoker
            .apply_and_wait(binding)
            .await
            .map_err(|e| Error::Provisioning(e.to_string()))?;

        let outputs = self
            .invoker
            .read_all_outputs(binding)
            .await
            .map_err(|e| Error::Provisioning(e.to_string()))?;

        let reader = outputs
            .require_string(&self.outputs.reader)
            .map_err(|e| Error::Provisioning(e.to_string()))?;
        let owner = outputs
            .require_string(&self.outputs.owner)
            .map_err(|e| Error::Provisioning(e.to_string()))?;

        tracing::info!(reader = %reader, owner = %owner, "prerequisites provisioned");

        Ok(PrerequisiteIdentities {
            reader: reader.to_string(),
            owner: owner.to_string(),
        })
    }
}
