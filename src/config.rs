//! Harness configuration and its validation.
//!
//! Configuration is read from YAML or TOML. Every field has a default that
//! reproduces the subnet module's standard suite, so an empty file (or no
//! file at all) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::phases::{default_expected_diagnostics, Phase, ResourceCheck};
use crate::provision::PrerequisiteOutputs;
use crate::region::DEFAULT_PROJECT_ENV_VARS;

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "harness.yaml";

/// Where candidate regions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegionSource {
    /// Ask `gcloud` for the project's regions.
    #[default]
    Gcloud,
    /// Use `static_regions`.
    Static,
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Terraform binary.
    #[serde(default = "default_engine_binary")]
    pub binary: String,
    /// Per-command timeout in seconds. Unset waits indefinitely.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

fn default_engine_binary() -> String {
    "terraform".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            command_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    /// Returns the command timeout as a Duration.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

/// Region discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Region source.
    #[serde(default)]
    pub source: RegionSource,
    /// gcloud binary.
    #[serde(default = "default_gcloud_binary")]
    pub gcloud_binary: String,
    /// Regions used with the static source.
    #[serde(default)]
    pub static_regions: Vec<String>,
}

fn default_gcloud_binary() -> String {
    "gcloud".to_string()
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            source: RegionSource::default(),
            gcloud_binary: default_gcloud_binary(),
            static_regions: Vec::new(),
        }
    }
}

/// Bootstrap module settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrerequisiteConfig {
    /// Bootstrap module directory, relative to the root.
    #[serde(default = "default_prerequisite_module")]
    pub module: PathBuf,
    /// Output holding the reader identity.
    #[serde(default = "default_reader_output")]
    pub reader_output: String,
    /// Output holding the owner identity.
    #[serde(default = "default_owner_output")]
    pub owner_output: String,
}

fn default_prerequisite_module() -> PathBuf {
    PathBuf::from(".")
}

fn default_reader_output() -> String {
    PrerequisiteOutputs::default().reader
}

fn default_owner_output() -> String {
    PrerequisiteOutputs::default().owner
}

impl Default for PrerequisiteConfig {
    fn default() -> Self {
        Self {
            module: default_prerequisite_module(),
            reader_output: default_reader_output(),
            owner_output: default_owner_output(),
        }
    }
}

impl PrerequisiteConfig {
    /// Returns the output names to read.
    pub fn outputs(&self) -> PrerequisiteOutputs {
        PrerequisiteOutputs {
            reader: self.reader_output.clone(),
            owner: self.owner_output.clone(),
        }
    }
}

/// An expected-failure plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionConfig {
    /// Module directory, relative to the root.
    pub module: PathBuf,
    /// Phrases that must all appear in the plan output.
    #[serde(default = "default_expected_diagnostics")]
    pub expected: Vec<String>,
}

/// A full lifecycle check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Module directory, relative to the root.
    pub module: PathBuf,
    /// Resource that must be published after apply.
    #[serde(flatten)]
    pub check: ResourceCheck,
}

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Root holding the bootstrap module and the variants. Relative paths
    /// resolve against the working directory.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Prefix of the run's environment tag.
    #[serde(default = "default_environment_prefix")]
    pub environment_prefix: String,

    /// Regions that must never be selected.
    #[serde(default = "default_region_blacklist")]
    pub region_blacklist: Vec<String>,

    /// Variables consulted for the project id, in order.
    #[serde(default = "default_project_env_vars")]
    pub project_env_vars: Vec<String>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub regions: RegionConfig,

    #[serde(default)]
    pub prerequisite: PrerequisiteConfig,

    /// Expected-failure plans, run first.
    #[serde(default = "default_assertions")]
    pub assertions: Vec<AssertionConfig>,

    /// Plan-only checks, run second.
    #[serde(default = "default_plan_checks")]
    pub plan_checks: Vec<PathBuf>,

    /// Lifecycle checks, run last.
    #[serde(default = "default_integration")]
    pub integration: Vec<IntegrationConfig>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_environment_prefix() -> String {
    "terratest".to_string()
}

fn default_region_blacklist() -> Vec<String> {
    vec!["asia-east2".to_string()]
}

fn default_project_env_vars() -> Vec<String> {
    DEFAULT_PROJECT_ENV_VARS.iter().map(|s| s.to_string()).collect()
}

fn default_assertions() -> Vec<AssertionConfig> {
    vec![AssertionConfig {
        module: PathBuf::from("assertions"),
        expected: default_expected_diagnostics(),
    }]
}

fn default_plan_checks() -> Vec<PathBuf> {
    vec![PathBuf::from("defaults"), PathBuf::from("overrides")]
}

fn default_integration() -> Vec<IntegrationConfig> {
    ["defaults", "overrides"]
        .into_iter()
        .map(|module| IntegrationConfig {
            module: PathBuf::from(module),
            check: ResourceCheck::default(),
        })
        .collect()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            environment_prefix: default_environment_prefix(),
            region_blacklist: default_region_blacklist(),
            project_env_vars: default_project_env_vars(),
            engine: EngineConfig::default(),
            regions: RegionConfig::default(),
            prerequisite: PrerequisiteConfig::default(),
            assertions: default_assertions(),
            plan_checks: default_plan_checks(),
            integration: default_integration(),
        }
    }
}

impl HarnessConfig {
    /// Loads a configuration file, choosing the format by extension.
    ///
    /// `.toml` is parsed as TOML; anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(Error::Io)?;

        let is_toml = path.extension().map(|e| e == "toml").unwrap_or(false);
        if is_toml {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
        }
    }

    /// Loads `harness.yaml` from `dir` if present, otherwise returns defaults.
    pub fn discover(dir: &Path) -> Result<Self> {
        let candidate = dir.join(DEFAULT_CONFIG_FILE);
        if candidate.exists() {
            tracing::info!(path = ?candidate, "loading harness configuration");
            Self::load(candidate)
        } else {
            tracing::info!("no harness configuration found, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolves the root against `cwd`.
    pub fn resolve_root(&self, cwd: &Path) -> PathBuf {
        if self.root.is_absolute() {
            self.root.clone()
        } else {
            cwd.join(&self.root)
        }
    }

    /// Returns the ordered phase list: assertions, plans, integrations.
    pub fn phases(&self) -> Vec<Phase> {
        let assertions = self.assertions.iter().map(|a| Phase::Assertion {
            module: a.module.clone(),
            expected: a.expected.clone(),
        });
        let plans = self.plan_checks.iter().map(|module| Phase::Plan {
            module: module.clone(),
        });
        let integrations = self.integration.iter().map(|i| Phase::Integration {
            module: i.module.clone(),
            check: i.check.clone(),
        });

        assertions.chain(plans).chain(integrations).collect()
    }
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for EngineConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.binary.trim().is_empty() {
            result.add_error("engine.binary cannot be empty");
        }
        if self.command_timeout_secs == Some(0) {
            result.add_error("engine.command_timeout_secs must be greater than zero");
        }

        result
    }
}

impl Validate for RegionConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        match self.source {
            RegionSource::Static if self.static_regions.is_empty() => {
                result.add_error("regions.static_regions cannot be empty with the static source");
            }
            RegionSource::Gcloud if self.gcloud_binary.trim().is_empty() => {
                result.add_error("regions.gcloud_binary cannot be empty");
            }
            RegionSource::Gcloud if !self.static_regions.is_empty() => {
                result.add_warning("regions.static_regions is ignored with the gcloud source");
            }
            _ => {}
        }

        result
    }
}

impl Validate for HarnessConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.environment_prefix.trim().is_empty() {
            result.add_error("environment_prefix cannot be empty");
        }

        if self.project_env_vars.is_empty() {
            result.add_error("project_env_vars must name at least one variable");
        }

        result.merge(self.engine.validate());
        result.merge(self.regions.validate());

        if self.regions.source == RegionSource::Static
            && !self.regions.static_regions.is_empty()
            && self
                .regions
                .static_regions
                .iter()
                .all(|r| self.region_blacklist.contains(r))
        {
            result.add_error("region_blacklist excludes every static region");
        }

        if self.prerequisite.reader_output.is_empty() || self.prerequisite.owner_output.is_empty() {
            result.add_error("prerequisite output names cannot be empty");
        }

        for assertion in &self.assertions {
            if assertion.expected.is_empty() {
                result.add_error(format!(
                    "assertion module '{}' has no expected diagnostics",
                    assertion.module.display()
                ));
            }
        }

        let phases = self.phases();
        if phases.is_empty() {
            result.add_warning("no phases configured; only provisioning and cleanup will run");
        }

        for phase in &phases {
            let module = phase.module();
            if module.as_os_str().is_empty() {
                result.add_error(format!("phase '{}' has an empty module path", phase.kind().label()));
            } else if module.is_absolute() {
                result.add_warning(format!(
                    "phase '{}' uses absolute module path; it will not be swept unless under root",
                    phase.name()
                ));
            }
        }

        result
    }
}
