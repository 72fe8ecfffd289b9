//! Error types for the module harness.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for harness operations.
///
/// Variants that wrap engine failures carry the engine's diagnostic text
/// verbatim, since assertion phases match on exactly that text.
#[derive(Error, Debug)]
pub enum Error {
    /// Project or region discovery failed.
    #[error("provider discovery failed: {0}")]
    ProviderDiscovery(String),

    /// Prerequisite apply or output read failed.
    #[error("prerequisite provisioning failed: {0}")]
    Provisioning(String),

    /// An expected-failure plan succeeded, or expected diagnostics were absent.
    #[error("plan validation failed: {0}")]
    PlanValidation(String),

    /// A plan that should succeed reported a non-zero status.
    #[error("plan failed for {}:\n{output}", .module.display())]
    PlanFailure { module: PathBuf, output: String },

    /// Init or apply reported a non-zero status.
    #[error("apply failed for {}:\n{output}", .module.display())]
    ApplyFailure { module: PathBuf, output: String },

    /// Destroy reported a non-zero status.
    #[error("destroy failed for {}:\n{output}", .module.display())]
    DestroyFailure { module: PathBuf, output: String },

    /// A required output was not published by the module.
    #[error("module {} did not publish required output '{name}'", .module.display())]
    MissingOutput { module: PathBuf, name: String },

    /// An output was published but does not have the expected shape.
    #[error("output '{name}' of module {} is malformed: {reason}", .module.display())]
    MalformedOutput {
        module: PathBuf,
        name: String,
        reason: String,
    },

    /// An engine command exceeded its configured timeout.
    #[error("engine command '{command}' timed out after {after:?}")]
    EngineTimeout { command: String, after: Duration },

    /// The engine process could not be started or awaited.
    #[error("engine error: {0}")]
    Engine(String),

    /// Harness configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for errors that abort the run rather than a single phase.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ProviderDiscovery(_) | Error::Provisioning(_))
    }
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;
