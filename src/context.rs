//! Run-scoped context and per-phase module bindings.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable the engine reads the target project from.
pub const PROJECT_ENV_VAR: &str = "GOOGLE_CLOUD_PROJECT";

/// Service-account identities published by the bootstrap module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteIdentities {
    /// Reader service-account email.
    pub reader: String,
    /// Owner service-account email.
    pub owner: String,
}

/// State shared by every phase of a single run.
///
/// The context is never mutated in place. Recording the prerequisite
/// identities produces a new, extended value via [`RunContext::with_prerequisites`].
#[derive(Debug, Clone)]
pub struct RunContext {
    environment: String,
    region_blacklist: BTreeSet<String>,
    project_id: String,
    prerequisites: Option<PrerequisiteIdentities>,
}

impl RunContext {
    /// Creates a context with a freshly generated environment tag.
    ///
    /// The tag has the form `{prefix} {token}` where `token` is a short,
    /// lowercase unique id.
    pub fn new(
        prefix: &str,
        region_blacklist: impl IntoIterator<Item = String>,
        project_id: impl Into<String>,
    ) -> Self {
        let token = &uuid::Uuid::new_v4().simple().to_string()[..8];
        Self::with_environment(
            format!("{} {}", prefix, token.to_lowercase()),
            region_blacklist,
            project_id,
        )
    }

    /// Creates a context with an explicit environment tag.
    pub fn with_environment(
        environment: impl Into<String>,
        region_blacklist: impl IntoIterator<Item = String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            environment: environment.into(),
            region_blacklist: region_blacklist.into_iter().collect(),
            project_id: project_id.into(),
            prerequisites: None,
        }
    }

    /// Returns the environment tag applied to every provisioned resource.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Returns the regions that must never be selected.
    pub fn region_blacklist(&self) -> &BTreeSet<String> {
        &self.region_blacklist
    }

    /// Returns the cloud project identifier.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Returns the prerequisite identities, if provisioning has completed.
    pub fn prerequisites(&self) -> Option<&PrerequisiteIdentities> {
        self.prerequisites.as_ref()
    }

    /// Returns a new context carrying the prerequisite identities.
    ///
    /// Fails if this context already carries identities: prerequisites are
    /// written at most once per run.
    pub fn with_prerequisites(&self, identities: PrerequisiteIdentities) -> Result<Self> {
        if let Some(existing) = &self.prerequisites {
            return Err(Error::Provisioning(format!(
                "prerequisites already recorded for environment '{}' (reader {})",
                self.environment, existing.reader
            )));
        }

        Ok(Self {
            prerequisites: Some(identities),
            ..self.clone()
        })
    }

    /// Builds a fresh binding of `module_dir` in `region` from this context.
    pub fn bind(&self, module_dir: impl Into<PathBuf>, region: impl Into<String>) -> ModuleBinding {
        let (reader, owner) = match &self.prerequisites {
            Some(ids) => (ids.reader.clone(), ids.owner.clone()),
            None => (String::new(), String::new()),
        };

        ModuleBinding {
            module_dir: module_dir.into(),
            region: region.into(),
            environment: self.environment.clone(),
            sa_reader_email: reader,
            sa_owner_email: owner,
            project_id: self.project_id.clone(),
        }
    }
}

/// Everything the engine needs to run one module variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBinding {
    /// Directory holding the module definition.
    pub module_dir: PathBuf,
    /// Region the module is deployed to.
    pub region: String,
    /// Environment tag of the run.
    pub environment: String,
    /// Reader identity (empty before provisioning).
    pub sa_reader_email: String,
    /// Owner identity (empty before provisioning).
    pub sa_owner_email: String,
    /// Target cloud project.
    pub project_id: String,
}

impl ModuleBinding {
    /// Returns the module directory.
    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    /// Input variables passed to the module.
    pub fn vars(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("environment".to_string(), self.environment.clone()),
            ("location".to_string(), self.region.clone()),
            ("sa_reader_email".to_string(), self.sa_reader_email.clone()),
            ("sa_owner_email".to_string(), self.sa_owner_email.clone()),
        ])
    }

    /// Environment overlay for engine processes.
    pub fn env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(PROJECT_ENV_VAR.to_string(), self.project_id.clone())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identities() -> PrerequisiteIdentities {
        PrerequisiteIdentities {
            reader: "reader@proj.iam.gserviceaccount.com".to_string(),
            owner: "owner@proj.iam.gserviceaccount.com".to_string(),
        }
    }

    #[test]
    fn environment_tag_combines_prefix_and_token() {
        let ctx = RunContext::new("terratest", vec!["asia-east2".to_string()], "proj");
        let (prefix, token) = ctx.environment().split_once(' ').unwrap();
        assert_eq!(prefix, "terratest");
        assert_eq!(token.len(), 8);
        assert_eq!(token, token.to_lowercase());
    }

    #[test]
    fn environment_tags_differ_between_runs() {
        let a = RunContext::new("terratest", Vec::new(), "proj");
        let b = RunContext::new("terratest", Vec::new(), "proj");
        assert_ne!(a.environment(), b.environment());
    }

    #[test]
    fn with_prerequisites_extends_without_mutating() {
        let ctx = RunContext::with_environment("terratest abc", Vec::new(), "proj");
        let extended = ctx.with_prerequisites(identities()).unwrap();

        assert!(ctx.prerequisites().is_none());
        assert_eq!(extended.prerequisites(), Some(&identities()));
        assert_eq!(extended.environment(), ctx.environment());
    }

    #[test]
    fn with_prerequisites_refuses_second_write() {
        let ctx = RunContext::with_environment("terratest abc", Vec::new(), "proj")
            .with_prerequisites(identities())
            .unwrap();

        let err = ctx.with_prerequisites(identities()).unwrap_err();
        assert!(matches!(err, Error::Provisioning(_)));
    }

    #[test]
    fn binding_before_provisioning_has_empty_identities() {
        let ctx = RunContext::with_environment("terratest abc", Vec::new(), "proj");
        let binding = ctx.bind(".", "europe-west1");
        let vars = binding.vars();

        assert_eq!(vars["environment"], "terratest abc");
        assert_eq!(vars["location"], "europe-west1");
        assert_eq!(vars["sa_reader_email"], "");
        assert_eq!(vars["sa_owner_email"], "");
        assert_eq!(binding.env()[PROJECT_ENV_VAR], "proj");
    }

    #[test]
    fn binding_after_provisioning_carries_identities() {
        let ctx = RunContext::with_environment("terratest abc", Vec::new(), "proj")
            .with_prerequisites(identities())
            .unwrap();
        let binding = ctx.bind("defaults", "us-central1");

        assert_eq!(binding.module_dir(), Path::new("defaults"));
        assert_eq!(binding.sa_reader_email, identities().reader);
        assert_eq!(binding.sa_owner_email, identities().owner);
    }
}
