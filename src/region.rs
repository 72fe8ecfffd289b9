//! Region and project discovery.
//!
//! Wraps the provider's region listing with a static blacklist. The blacklist
//! is a hard filter: a blacklisted region is never returned.

use std::collections::BTreeSet;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Environment variables consulted, in order, for the ambient project id.
pub const DEFAULT_PROJECT_ENV_VARS: &[&str] = &[
    "GOOGLE_PROJECT",
    "GOOGLE_CLOUD_PROJECT",
    "GOOGLE_CLOUD_PROJECT_ID",
    "GCLOUD_PROJECT",
    "CLOUDSDK_CORE_PROJECT",
];

/// Resolves the project id from the first set, non-empty variable in `vars`.
pub fn resolve_project_id<S: AsRef<str>>(vars: &[S]) -> Result<String> {
    resolve_project_id_with(vars, |name| std::env::var(name).ok())
}

/// Like [`resolve_project_id`], reading variables through `lookup`.
pub fn resolve_project_id_with<S, F>(vars: &[S], lookup: F) -> Result<String>
where
    S: AsRef<str>,
    F: Fn(&str) -> Option<String>,
{
    vars.iter()
        .filter_map(|name| lookup(name.as_ref()))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .ok_or_else(|| {
            let names: Vec<&str> = vars.iter().map(|name| name.as_ref()).collect();
            Error::ProviderDiscovery(format!(
                "no project id set; expected one of {}",
                names.join(", ")
            ))
        })
}

/// Source of candidate regions for a project.
#[async_trait]
pub trait RegionCatalog: Send + Sync {
    /// Lists the regions available to `project_id`.
    async fn list_regions(&self, project_id: &str) -> Result<Vec<String>>;
}

/// Region catalog backed by the `gcloud` CLI.
pub struct GcloudRegionCatalog {
    /// Path to the gcloud binary.
    binary: String,
}

impl Default for GcloudRegionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl GcloudRegionCatalog {
    /// Creates a catalog using the default `gcloud` command.
    pub fn new() -> Self {
        Self {
            binary: "gcloud".to_string(),
        }
    }

    /// Creates a catalog with a custom binary path.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl RegionCatalog for GcloudRegionCatalog {
    async fn list_regions(&self, project_id: &str) -> Result<Vec<String>> {
        let output = Command::new(&self.binary)
            .args([
                "compute",
                "regions",
                "list",
                "--project",
                project_id,
                "--filter=status=UP",
                "--format=value(name)",
            ])
            .output()
            .await
            .map_err(|e| Error::ProviderDiscovery(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ProviderDiscovery(format!(
                "region listing failed for project {}: {}",
                project_id, stderr
            )));
        }

        Ok(parse_region_listing(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_region_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Region catalog serving a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticRegionCatalog {
    regions: Vec<String>,
}

impl StaticRegionCatalog {
    /// Creates a catalog with the given regions.
    pub fn new(regions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            regions: regions.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl RegionCatalog for StaticRegionCatalog {
    async fn list_regions(&self, _project_id: &str) -> Result<Vec<String>> {
        Ok(self.regions.clone())
    }
}

/// Picks a random eligible region.
pub struct RegionSelector {
    catalog: Box<dyn RegionCatalog>,
    blacklist: BTreeSet<String>,
}

impl RegionSelector {
    /// Creates a selector excluding `blacklist`.
    pub fn new(catalog: Box<dyn RegionCatalog>, blacklist: BTreeSet<String>) -> Self {
        Self { catalog, blacklist }
    }

    /// Returns the excluded regions.
    pub fn blacklist(&self) -> &BTreeSet<String> {
        &self.blacklist
    }

    /// Lists the regions of `project_id` that are not blacklisted.
    pub async fn eligible(&self, project_id: &str) -> Result<Vec<String>> {
        let regions = self.catalog.list_regions(project_id).await?;
        Ok(regions
            .into_iter()
            .filter(|r| !self.blacklist.contains(r))
            .collect())
    }

    /// Selects a random eligible region.
    pub async fn select(&self, project_id: &str) -> Result<String> {
        let eligible = self.eligible(project_id).await?;
        let region = eligible
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| {
                Error::ProviderDiscovery(format!(
                    "no eligible region for project {} after excluding {:?}",
                    project_id, self.blacklist
                ))
            })?;

        tracing::debug!(project = %project_id, region = %region, "selected region");
        Ok(region)
    }
}
