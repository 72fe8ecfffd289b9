//! Test phases run against module variants.
//!
//! Each phase receives a freshly built [`crate::context::ModuleBinding`] and
//! reports a [`PhaseOutcome`]; a failed phase never stops its siblings.

pub mod assertion;
pub mod integration;
pub mod plan;

pub use assertion::{default_expected_diagnostics, AssertionRunner};
pub use integration::{IntegrationRunner, ResourceCheck};
pub use plan::PlanRunner;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of test phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Plan expected to fail with specific diagnostics.
    Assertion,
    /// Plan expected to succeed.
    Plan,
    /// Apply, inspect outputs, destroy.
    Integration,
}

impl PhaseKind {
    /// Short label used in phase names.
    pub fn label(&self) -> &'static str {
        match self {
            PhaseKind::Assertion => "assertions",
            PhaseKind::Plan => "plan",
            PhaseKind::Integration => "integration",
        }
    }
}

/// One entry of the ordered phase list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Expected-failure plan against `module`.
    Assertion {
        module: PathBuf,
        expected: Vec<String>,
    },
    /// Plan-only check against `module`.
    Plan { module: PathBuf },
    /// Full lifecycle against `module`.
    Integration { module: PathBuf, check: ResourceCheck },
}

impl Phase {
    /// Returns the phase kind.
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Assertion { .. } => PhaseKind::Assertion,
            Phase::Plan { .. } => PhaseKind::Plan,
            Phase::Integration { .. } => PhaseKind::Integration,
        }
    }

    /// Returns the module directory the phase runs against.
    pub fn module(&self) -> &PathBuf {
        match self {
            Phase::Assertion { module, .. }
            | Phase::Plan { module }
            | Phase::Integration { module, .. } => module,
        }
    }

    /// Returns a display name such as `integration:defaults`.
    pub fn name(&self) -> String {
        format!("{}:{}", self.kind().label(), self.module().display())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Final status of a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum PhaseStatus {
    /// The phase passed.
    Passed,
    /// The phase failed; the reason carries the engine diagnostics.
    Failed(String),
    /// The phase never ran.
    Skipped(String),
}

/// Result of one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome {
    /// Phase name.
    pub name: String,
    /// Phase kind.
    pub kind: PhaseKind,
    /// Final status.
    pub status: PhaseStatus,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl PhaseOutcome {
    /// Creates a skipped outcome for `phase`.
    pub fn skipped(phase: &Phase, reason: impl Into<String>) -> Self {
        Self {
            name: phase.name(),
            kind: phase.kind(),
            status: PhaseStatus::Skipped(reason.into()),
            duration: Duration::ZERO,
        }
    }

    /// Returns true if the phase passed.
    pub fn passed(&self) -> bool {
        self.status == PhaseStatus::Passed
    }
}
