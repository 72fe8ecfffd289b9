//! Run teardown shared between the main path and the interrupt listener.
//!
//! Teardown destroys the module currently being exercised (if any) and then
//! the prerequisite module. It runs at most once per run: a second caller
//! waits for the first invocation and receives the same report.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock, PoisonError};

use serde::Serialize;
use tokio::sync::OnceCell;

use crate::context::ModuleBinding;
use crate::error::{Error, Result};
use crate::invoker::ModuleInvoker;

/// What teardown did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Module directories destroyed successfully.
    pub destroyed: Vec<PathBuf>,
    /// Destroy failures, logged but not escalated.
    pub failures: Vec<String>,
}

impl TeardownReport {
    /// Returns true if every destroy succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Idempotent destroy of everything a run provisioned.
pub struct Teardown {
    invoker: ModuleInvoker,
    prerequisite: OnceLock<ModuleBinding>,
    lingering: Mutex<Option<ModuleBinding>>,
    report: OnceCell<TeardownReport>,
}

impl Teardown {
    /// Creates an unarmed teardown.
    pub fn new(invoker: ModuleInvoker) -> Self {
        Self {
            invoker,
            prerequisite: OnceLock::new(),
            lingering: Mutex::new(None),
            report: OnceCell::new(),
        }
    }

    /// Registers the prerequisite binding to destroy.
    ///
    /// Must happen before the bootstrap apply starts so a partial apply is
    /// still torn down. Fails if already armed or if teardown already ran.
    pub fn arm(&self, binding: ModuleBinding) -> Result<()> {
        if self.has_run() {
            return Err(Error::Provisioning(
                "teardown already ran; refusing to provision".to_string(),
            ));
        }

        self.prerequisite.set(binding).map_err(|_| {
            Error::Provisioning("prerequisites already provisioned for this run".to_string())
        })
    }

    /// Returns the armed prerequisite binding.
    pub fn prerequisite(&self) -> Option<&ModuleBinding> {
        self.prerequisite.get()
    }

    /// Records a module whose resources are live until it is released.
    pub fn track(&self, binding: ModuleBinding) {
        *self.lingering.lock().unwrap_or_else(PoisonError::into_inner) = Some(binding);
    }

    /// Forgets `binding` once it has been destroyed by its owner.
    pub fn release(&self, binding: &ModuleBinding) {
        let mut slot = self.lingering.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref() == Some(binding) {
            *slot = None;
        }
    }

    /// Returns the module currently tracked as live.
    pub fn lingering(&self) -> Option<ModuleBinding> {
        self.lingering
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true once teardown has completed.
    pub fn has_run(&self) -> bool {
        self.report.initialized()
    }

    /// Runs teardown, or waits for the invocation already in progress.
    pub async fn run(&self) -> &TeardownReport {
        self.report.get_or_init(|| self.destroy_all()).await
    }

    async fn destroy_all(&self) -> TeardownReport {
        let mut report = TeardownReport::default();

        let lingering = self.lingering.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(binding) = lingering {
            tracing::info!(module = ?binding.module_dir, "cleaning possible lingering resources");
            self.destroy_one(&binding, &mut report).await;
        }

        match self.prerequisite.get() {
            Some(binding) => {
                tracing::info!(module = ?binding.module_dir, "cleaning prerequisite resources");
                self.destroy_one(binding, &mut report).await;
            }
            None => tracing::debug!("no prerequisites armed, nothing to destroy"),
        }

        report
    }

    async fn destroy_one(&self, binding: &ModuleBinding, report: &mut TeardownReport) {
        match self.invoker.destroy(binding).await {
            Ok(()) => report.destroyed.push(binding.module_dir.clone()),
            Err(e) => {
                tracing::error!(error = %e, module = ?binding.module_dir, "teardown destroy failed");
                report.failures.push(e.to_string());
            }
        }
    }
}
