//! Run coordinator: drives a harness run from discovery to cleanup.
//!
//! ```text
//! Init -> PrereqProvisioning -> PhasesRunning -> Cleanup -> Done
//!                                      |
//!                                      +-> Interrupted
//! ```
//!
//! The phase path is strictly sequential. The only concurrent task is the
//! interrupt listener, which shares the [`Teardown`] and the cancellation
//! token with the main path.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::HarnessConfig;
use crate::context::RunContext;
use crate::engine::InfraEngine;
use crate::error::{Error, Result};
use crate::invoker::ModuleInvoker;
use crate::phases::{
    AssertionRunner, IntegrationRunner, Phase, PhaseOutcome, PhaseStatus, PlanRunner,
};
use crate::provision::PrerequisiteProvisioner;
use crate::region::{resolve_project_id, RegionCatalog, RegionSelector};
use crate::sweep::ArtifactSweeper;
use crate::teardown::{Teardown, TeardownReport};

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    PrereqProvisioning,
    PhasesRunning,
    Cleanup,
    Done,
    Interrupted,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Environment tag, once generated.
    pub environment: Option<String>,
    /// One outcome per configured phase, in order.
    pub phases: Vec<PhaseOutcome>,
    /// Fatal error that stopped the run before its phases.
    pub aborted: Option<String>,
    /// True if an interrupt was observed.
    pub interrupted: bool,
    /// What teardown destroyed, and what it failed to.
    pub teardown: TeardownReport,
    /// Artifacts removed by the sweep; `None` if the sweep did not run or failed.
    pub swept: Option<usize>,
}

impl RunReport {
    /// Number of phases that passed.
    pub fn passed(&self) -> usize {
        self.phases.iter().filter(|p| p.passed()).count()
    }

    /// Number of phases that failed.
    pub fn failed(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| matches!(p.status, PhaseStatus::Failed(_)))
            .count()
    }

    /// Number of phases that never ran.
    pub fn skipped(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| matches!(p.status, PhaseStatus::Skipped(_)))
            .count()
    }

    /// Returns true if every phase passed and the run was neither aborted
    /// nor interrupted.
    pub fn success(&self) -> bool {
        !self.interrupted && self.aborted.is_none() && self.phases.iter().all(|p| p.passed())
    }

    /// Process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }
}

/// Registers the SIGINT handler and returns a future resolving on the next
/// interrupt.
///
/// Registration happens on the call, not on first poll, so an interrupt
/// arriving before the listener task is scheduled is still delivered.
#[cfg(unix)]
pub fn interrupt_signal() -> io::Result<impl Future<Output = io::Result<()>> + Send + 'static> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        match sigint.recv().await {
            Some(()) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::Other, "interrupt stream closed")),
        }
    })
}

/// Returns a future resolving on the next Ctrl-C.
#[cfg(not(unix))]
pub fn interrupt_signal() -> io::Result<impl Future<Output = io::Result<()>> + Send + 'static> {
    Ok(tokio::signal::ctrl_c())
}

/// Drives one harness run.
pub struct RunCoordinator {
    config: HarnessConfig,
    root: PathBuf,
    project_id: Option<String>,
    invoker: ModuleInvoker,
    regions: RegionSelector,
    teardown: Arc<Teardown>,
    cancel: CancellationToken,
    sweeper: ArtifactSweeper,
    state: RunState,
}

impl RunCoordinator {
    /// Creates a coordinator for modules under `root`.
    pub fn new(
        config: HarnessConfig,
        root: impl Into<PathBuf>,
        engine: Arc<dyn InfraEngine>,
        catalog: Box<dyn RegionCatalog>,
    ) -> Self {
        let invoker = ModuleInvoker::new(engine);
        let regions = RegionSelector::new(catalog, config.region_blacklist.iter().cloned().collect());

        Self {
            root: root.into(),
            project_id: None,
            teardown: Arc::new(Teardown::new(invoker.clone())),
            invoker,
            regions,
            cancel: CancellationToken::new(),
            sweeper: ArtifactSweeper::new(),
            state: RunState::Init,
            config,
        }
    }

    /// Uses `project_id` instead of reading it from the environment.
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Returns the current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Returns the module root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the token cancelled by the interrupt listener.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns the interrupt listener.
    ///
    /// When `signal` resolves the listener cancels the run and tears down
    /// everything provisioned so far; the handle resolves once teardown is
    /// complete. If `signal` itself fails the listener stays idle.
    pub fn spawn_interrupt_listener<F>(&self, signal: F) -> JoinHandle<TeardownReport>
    where
        F: Future<Output = io::Result<()>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let teardown = self.teardown.clone();

        tokio::spawn(async move {
            if let Err(e) = signal.await {
                tracing::error!(error = %e, "failed to listen for interrupt");
                std::future::pending::<()>().await;
            }

            tracing::warn!("interrupt received, tearing down");
            cancel.cancel();
            let report = teardown.run().await.clone();
            tracing::info!(
                destroyed = report.destroyed.len(),
                failures = report.failures.len(),
                "teardown after interrupt complete"
            );
            report
        })
    }

    /// Runs every phase and cleans up.
    pub async fn run(&mut self) -> RunReport {
        let phases = self.config.phases();
        let mut report = RunReport::default();

        self.transition(RunState::Init);
        match self.prepare(&mut report).await {
            Ok(context) => {
                self.transition(RunState::PhasesRunning);
                self.run_phases(&context, &phases, &mut report).await;
            }
            Err(e) => {
                let reason = if self.cancel.is_cancelled() {
                    report.interrupted = true;
                    "interrupted".to_string()
                } else {
                    tracing::error!(error = %e, "run aborted before phases");
                    report.aborted = Some(e.to_string());
                    format!("aborted: {}", e)
                };
                report.phases = phases
                    .iter()
                    .map(|phase| PhaseOutcome::skipped(phase, reason.clone()))
                    .collect();
            }
        }

        self.cleanup(&mut report).await;

        if report.interrupted {
            self.transition(RunState::Interrupted);
        } else {
            self.transition(RunState::Done);
        }

        tracing::info!(
            passed = report.passed(),
            failed = report.failed(),
            skipped = report.skipped(),
            exit_code = report.exit_code(),
            "run finished"
        );
        report
    }

    fn transition(&mut self, next: RunState) {
        tracing::info!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    /// Discovery and prerequisite provisioning.
    async fn prepare(&mut self, report: &mut RunReport) -> Result<RunContext> {
        let project_id = match &self.project_id {
            Some(id) => id.clone(),
            None => resolve_project_id(&self.config.project_env_vars)?,
        };

        let context = RunContext::new(
            &self.config.environment_prefix,
            self.config.region_blacklist.iter().cloned(),
            project_id,
        );
        report.environment = Some(context.environment().to_string());
        tracing::info!(
            environment = %context.environment(),
            project = %context.project_id(),
            "run context ready"
        );

        self.transition(RunState::PrereqProvisioning);
        if self.cancel.is_cancelled() {
            return Err(Error::Provisioning("interrupted before provisioning".to_string()));
        }

        let region = self.regions.select(context.project_id()).await?;
        let binding = context.bind(self.module_path(&self.config.prerequisite.module), region);

        // Armed before the apply so a partial apply is still destroyed.
        self.teardown.arm(binding.clone())?;

        let provisioner =
            PrerequisiteProvisioner::new(self.invoker.clone(), self.config.prerequisite.outputs());
        let identities = provisioner.provision(&binding).await?;
        tracing::info!(
            reader = %identities.reader,
            owner = %identities.owner,
            "prerequisites provisioned"
        );

        context.with_prerequisites(identities)
    }

    async fn run_phases(&self, context: &RunContext, phases: &[Phase], report: &mut RunReport) {
        for (index, phase) in phases.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(remaining = phases.len() - index, "interrupted, skipping remaining phases");
                report.interrupted = true;
                report.phases.extend(
                    phases[index..]
                        .iter()
                        .map(|rest| PhaseOutcome::skipped(rest, "interrupted")),
                );
                return;
            }

            let outcome = self.run_phase(context, phase).await;
            report.phases.push(outcome);
        }
    }

    async fn run_phase(&self, context: &RunContext, phase: &Phase) -> PhaseOutcome {
        tracing::info!(phase = %phase, "phase starting");
        let started = Instant::now();

        let status = match self.execute(context, phase).await {
            Ok(()) => {
                tracing::info!(phase = %phase, "phase passed");
                PhaseStatus::Passed
            }
            Err(e) => {
                tracing::error!(phase = %phase, error = %e, "phase failed");
                PhaseStatus::Failed(e.to_string())
            }
        };

        PhaseOutcome {
            name: phase.name(),
            kind: phase.kind(),
            status,
            duration: started.elapsed(),
        }
    }

    async fn execute(&self, context: &RunContext, phase: &Phase) -> Result<()> {
        let region = self.regions.select(context.project_id()).await?;
        let binding = context.bind(self.module_path(phase.module()), region);

        match phase {
            Phase::Assertion { expected, .. } => {
                AssertionRunner::new(self.invoker.clone())
                    .run_assertions(&binding, expected)
                    .await
            }
            Phase::Plan { .. } => PlanRunner::new(self.invoker.clone()).run_plan(&binding).await,
            Phase::Integration { check, .. } => IntegrationRunner::new(self.invoker.clone())
                .with_teardown(self.teardown.clone())
                .run_integration(&binding, check)
                .await
                .map(|_| ()),
        }
    }

    async fn cleanup(&mut self, report: &mut RunReport) {
        self.transition(RunState::Cleanup);

        let teardown = self.teardown.run().await;
        if !teardown.is_clean() {
            tracing::warn!(failures = teardown.failures.len(), "teardown left resources behind");
        }
        report.teardown = teardown.clone();

        // State files stay on disk after an interrupt for manual recovery.
        if report.interrupted {
            tracing::warn!(root = ?self.root, "interrupted, leaving artifacts in place");
            return;
        }

        match self.sweeper.sweep(&self.root) {
            Ok(removed) => report.swept = Some(removed),
            Err(e) => tracing::warn!(root = ?self.root, error = %e, "sweep failed"),
        }
    }

    fn module_path(&self, module: &Path) -> PathBuf {
        if module.is_absolute() {
            module.to_path_buf()
        } else if module == Path::new(".") {
            self.root.clone()
        } else {
            self.root.join(module)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::sync::oneshot;

    use super::*;
    use crate::config::{AssertionConfig, IntegrationConfig};
    use crate::engine::scripted::ScriptedEngine;
    use crate::engine::{EngineOp, EngineOutput};
    use crate::phases::{PhaseKind, ResourceCheck};
    use crate::region::StaticRegionCatalog;

    const PREREQ_OUTPUTS: &str = r#"{
        "sa_reader_email": {"sensitive": false, "value": "reader@proj.iam.gserviceaccount.com"},
        "sa_owner_email": {"sensitive": false, "value": "owner@proj.iam.gserviceaccount.com"}
    }"#;

    const SUBNET_OUTPUTS: &str = r#"{
        "map": {"sensitive": false, "value": {"k8nodes": {"id": "projects/proj/regions/r/subnetworks/k8nodes"}}}
    }"#;

    fn config() -> HarnessConfig {
        HarnessConfig {
            assertions: vec![AssertionConfig {
                module: PathBuf::from("assertions"),
                expected: vec!["does not match regex".to_string()],
            }],
            integration: ["defaults", "overrides"]
                .into_iter()
                .map(|m| IntegrationConfig {
                    module: PathBuf::from(m),
                    check: ResourceCheck::default(),
                })
                .collect(),
            ..Default::default()
        }
    }

    /// Engine where every phase passes.
    fn passing_engine(root: &Path) -> ScriptedEngine {
        ScriptedEngine::new()
            .respond(EngineOp::Output, root, EngineOutput::success(PREREQ_OUTPUTS))
            .respond(
                EngineOp::Plan,
                root.join("assertions"),
                EngineOutput::failure("Error: name [Bad] does not match regex"),
            )
            .respond(EngineOp::Output, root.join("defaults"), EngineOutput::success(SUBNET_OUTPUTS))
            .respond(EngineOp::Output, root.join("overrides"), EngineOutput::success(SUBNET_OUTPUTS))
    }

    fn coordinator(root: &Path, engine: Arc<ScriptedEngine>) -> RunCoordinator {
        RunCoordinator::new(
            config(),
            root,
            engine,
            Box::new(StaticRegionCatalog::new(["asia-east2", "us-east4", "europe-west1"])),
        )
        .with_project_id("proj")
    }

    fn leave_artifacts(root: &Path) {
        std::fs::create_dir_all(root.join("defaults/.terraform")).unwrap();
        std::fs::write(root.join("terraform.tfstate"), "{}").unwrap();
        std::fs::write(root.join("defaults/terraform.tfplan"), "").unwrap();
    }

    #[tokio::test]
    async fn normal_run_passes_and_cleans_up_once() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        leave_artifacts(root);
        let engine = Arc::new(passing_engine(root));
        let mut coordinator = coordinator(root, engine.clone());

        let report = coordinator.run().await;

        assert_eq!(report.exit_code(), 0, "{:?}", report.phases);
        assert_eq!(report.phases.len(), 5);
        assert_eq!(coordinator.state(), RunState::Done);
        assert_eq!(engine.count(EngineOp::Destroy, root), 1);
        assert_eq!(report.teardown.destroyed, vec![root.to_path_buf()]);
        assert_eq!(report.swept, Some(3));
        assert!(!root.join("terraform.tfstate").exists());
        assert!(!root.join("defaults/.terraform").exists());
    }

    #[tokio::test]
    async fn phases_see_identities_and_never_a_blacklisted_region() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let engine = Arc::new(passing_engine(root));

        coordinator(root, engine.clone()).run().await;

        let calls = engine.calls();
        for call in calls.iter().filter(|c| c.op.takes_vars()) {
            assert_ne!(call.request.vars["location"], "asia-east2");
            assert!(call.request.vars["environment"].starts_with("terratest "));
            assert_eq!(call.request.env["GOOGLE_CLOUD_PROJECT"], "proj");
        }

        let plan = calls
            .iter()
            .find(|c| c.op == EngineOp::Plan && c.request.module_dir == root.join("defaults"))
            .unwrap();
        assert_eq!(
            plan.request.vars["sa_reader_email"],
            "reader@proj.iam.gserviceaccount.com"
        );
    }

    #[tokio::test]
    async fn provisioning_failure_skips_phases_and_still_tears_down() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let engine = Arc::new(ScriptedEngine::new().respond(
            EngineOp::Apply,
            root,
            EngineOutput::failure("Error: permission denied"),
        ));
        let mut coordinator = coordinator(root, engine.clone());

        let report = coordinator.run().await;

        assert_eq!(report.exit_code(), 1);
        assert!(report.aborted.as_deref().unwrap().contains("permission denied"));
        assert_eq!(report.skipped(), 5);
        assert_eq!(engine.count(EngineOp::Plan, root.join("defaults")), 0);
        assert_eq!(engine.count(EngineOp::Destroy, root), 1);
        assert_eq!(report.swept, Some(0));
    }

    #[tokio::test]
    async fn missing_project_aborts_before_any_engine_call() {
        let temp = TempDir::new().unwrap();
        let engine = Arc::new(ScriptedEngine::new());
        let config = HarnessConfig {
            project_env_vars: vec!["MODULE_HARNESS_TEST_PROJECT_NEVER_SET".to_string()],
            ..config()
        };
        let mut coordinator = RunCoordinator::new(
            config,
            temp.path(),
            engine.clone(),
            Box::new(StaticRegionCatalog::new(["us-east4"])),
        );

        let report = coordinator.run().await;

        assert!(report.aborted.as_deref().unwrap().contains("provider discovery"));
        assert!(engine.calls().is_empty());
        assert!(report.phases.iter().all(|p| !p.passed()));
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn failed_phase_does_not_stop_siblings() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let engine = Arc::new(passing_engine(root).respond(
            EngineOp::Plan,
            root.join("defaults"),
            EngineOutput::failure("Error: Invalid CIDR"),
        ));

        let report = coordinator(root, engine.clone()).run().await;

        let failed: Vec<&str> = report
            .phases
            .iter()
            .filter(|p| !p.passed())
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(failed, vec!["plan:defaults"]);
        assert_eq!(report.passed(), 4);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(engine.count(EngineOp::Apply, root.join("overrides")), 1);
    }

    #[tokio::test]
    async fn interrupt_tears_down_prerequisites_and_skips_the_rest() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        leave_artifacts(root);

        let (tx, rx) = oneshot::channel::<()>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let engine = Arc::new(passing_engine(root).on_call(
            EngineOp::Plan,
            root.join("assertions"),
            move || {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
                tokio::time::sleep(Duration::from_millis(20))
            },
        ));
        let mut coordinator = coordinator(root, engine.clone());

        let listener = coordinator.spawn_interrupt_listener(async move {
            let _ = rx.await;
            Ok(())
        });
        let report = coordinator.run().await;
        let from_listener = listener.await.unwrap();

        assert!(report.interrupted);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(coordinator.state(), RunState::Interrupted);
        assert_eq!(from_listener.destroyed, vec![root.to_path_buf()]);
        assert_eq!(engine.count(EngineOp::Destroy, root), 1);

        let skipped: Vec<PhaseKind> = report
            .phases
            .iter()
            .filter(|p| matches!(p.status, PhaseStatus::Skipped(_)))
            .map(|p| p.kind)
            .collect();
        assert_eq!(
            skipped,
            vec![PhaseKind::Plan, PhaseKind::Plan, PhaseKind::Integration, PhaseKind::Integration]
        );
        assert_eq!(report.swept, None);
        assert!(root.join("terraform.tfstate").exists());
    }

    #[tokio::test]
    async fn interrupt_before_run_provisions_nothing() {
        let temp = TempDir::new().unwrap();
        let engine = Arc::new(ScriptedEngine::new());
        let mut coordinator = coordinator(temp.path(), engine.clone());

        coordinator.cancellation_token().cancel();
        let report = coordinator.run().await;

        assert!(report.interrupted);
        assert!(report.aborted.is_none());
        assert!(engine.calls().is_empty());
        assert_eq!(report.skipped(), 5);
    }

    /// Serves regions for the bootstrap module only.
    struct DriesUpAfterFirstListing {
        listed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl RegionCatalog for DriesUpAfterFirstListing {
        async fn list_regions(&self, _project_id: &str) -> Result<Vec<String>> {
            if self.listed.swap(true, Ordering::SeqCst) {
                Ok(Vec::new())
            } else {
                Ok(vec!["us-east4".to_string()])
            }
        }
    }

    #[tokio::test]
    async fn region_discovery_failure_after_provisioning_fails_phases_not_run() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let engine = Arc::new(passing_engine(root));
        let mut coordinator = RunCoordinator::new(
            config(),
            root,
            engine.clone(),
            Box::new(DriesUpAfterFirstListing {
                listed: AtomicBool::new(false),
            }),
        )
        .with_project_id("proj");

        let report = coordinator.run().await;

        assert!(report.aborted.is_none());
        assert_eq!(report.failed(), 5);
        assert!(report.phases.iter().all(|p| matches!(
            &p.status,
            PhaseStatus::Failed(reason) if reason.contains("provider discovery")
        )));
        assert_eq!(engine.count(EngineOp::Destroy, root), 1);
        assert_eq!(report.exit_code(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_sent_before_first_poll_is_delivered() {
        let signal = interrupt_signal().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), signal)
            .await
            .expect("interrupt not delivered")
            .unwrap();
    }

    #[test]
    fn report_exit_code_requires_all_phases_to_pass() {
        let phase = Phase::Plan {
            module: PathBuf::from("defaults"),
        };
        let mut report = RunReport::default();
        assert_eq!(report.exit_code(), 0);

        report.phases.push(PhaseOutcome::skipped(&phase, "interrupted"));
        assert_eq!(report.exit_code(), 1);
    }
}
