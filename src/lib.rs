//! Module Harness - lifecycle test harness for infrastructure modules
//!
//! This library provisions a shared prerequisite environment, runs assertion,
//! plan and integration phases against module variants in randomly selected
//! regions, and guarantees teardown of everything it created, including on
//! interrupt.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod outputs;
pub mod phases;
pub mod provision;
pub mod region;
pub mod sweep;
pub mod teardown;

pub use error::{Error, Result};

pub use config::{HarnessConfig, RegionSource, Validate, ValidationResult};
pub use context::{ModuleBinding, PrerequisiteIdentities, RunContext};
pub use coordinator::{RunCoordinator, RunReport, RunState};
pub use engine::{EngineOp, EngineOutput, EngineRequest, InfraEngine, TerraformEngine};
pub use invoker::{ModuleInvoker, PlanOutcome};
pub use outputs::{ModuleOutputs, ResourceDescriptor, ResourceMap};
pub use phases::{Phase, PhaseKind, PhaseOutcome, PhaseStatus};
pub use provision::{PrerequisiteOutputs, PrerequisiteProvisioner};
pub use region::{
    resolve_project_id, GcloudRegionCatalog, RegionCatalog, RegionSelector, StaticRegionCatalog,
};
pub use sweep::ArtifactSweeper;
pub use teardown::{Teardown, TeardownReport};
