//! Removal of generated engine artifacts from module trees.

use std::fs;
use std::io;
use std::path::Path;

/// Directory names that are never descended into.
pub const VENDORED_DIRS: &[&str] = &["vendor"];

/// Directory names holding cached provisioning state, removed wholesale.
pub const STATE_CACHE_DIRS: &[&str] = &[".terraform"];

/// State and plan file names removed individually.
pub const ARTIFACT_FILES: &[&str] = &[
    "terraform.tfstate",
    "terraform.tfplan",
    "terraform.tfstate.backup",
];

/// Removes engine state and plan artifacts under a root directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactSweeper;

impl ArtifactSweeper {
    /// Creates a new sweeper.
    pub fn new() -> Self {
        Self
    }

    /// Walks `root` and removes every artifact, returning how many were removed.
    ///
    /// Running it on a clean tree, or twice in a row, removes nothing and
    /// succeeds. A missing `root` is an error.
    pub fn sweep(&self, root: &Path) -> io::Result<usize> {
        tracing::info!(root = ?root, "sweeping generated artifacts");

        // The root itself may be a link to the module tree; entries below it
        // are never followed.
        let metadata = fs::metadata(root)?;
        let removed = self.visit(root, &metadata)?;

        tracing::info!(root = ?root, removed, "sweep complete");
        Ok(removed)
    }

    fn visit(&self, path: &Path, metadata: &fs::Metadata) -> io::Result<usize> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        if metadata.is_dir() {
            if VENDORED_DIRS.contains(&name) {
                return Ok(0);
            }
            if STATE_CACHE_DIRS.contains(&name) {
                fs::remove_dir_all(path)?;
                tracing::info!(path = ?path, "removed");
                return Ok(1);
            }

            let mut removed = 0;
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                let metadata = entry.metadata()?;
                removed += self.visit(&entry.path(), &metadata)?;
            }
            return Ok(removed);
        }

        if ARTIFACT_FILES.contains(&name) {
            fs::remove_file(path)?;
            tracing::info!(path = ?path, "removed");
            return Ok(1);
        }

        Ok(0)
    }
}
