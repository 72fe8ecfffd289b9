//! Typed views over published module outputs.
//!
//! Outputs are decoded once, where they are read, so a missing or
//! mis-shaped value fails fast with [`Error::MissingOutput`] or
//! [`Error::MalformedOutput`] instead of at the point of use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One entry of `terraform output -json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct RawOutput {
    #[serde(default)]
    sensitive: bool,
    #[serde(default)]
    value: Value,
}

/// A resource published in an output map, keyed by logical name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Provider-assigned resource identifier.
    pub id: String,
    /// Remaining published attributes.
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, Value>,
}

/// Logical resource name to descriptor.
pub type ResourceMap = BTreeMap<String, ResourceDescriptor>;

/// All outputs published by one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleOutputs {
    module: PathBuf,
    values: BTreeMap<String, Value>,
}

impl ModuleOutputs {
    /// Creates outputs from already-decoded values.
    pub fn new(module: impl Into<PathBuf>, values: BTreeMap<String, Value>) -> Self {
        Self {
            module: module.into(),
            values,
        }
    }

    /// Parses the JSON printed by `terraform output -json`.
    pub fn from_json(module: &Path, json: &str) -> Result<Self> {
        let raw: BTreeMap<String, RawOutput> =
            serde_json::from_str(json.trim()).map_err(|e| Error::MalformedOutput {
                module: module.to_path_buf(),
                name: "*".to_string(),
                reason: format!("output listing is not valid JSON: {}", e),
            })?;

        let values = raw
            .into_iter()
            .map(|(name, entry)| {
                if entry.sensitive {
                    tracing::debug!(output = %name, "reading sensitive output");
                }
                (name, entry.value)
            })
            .collect();

        Ok(Self::new(module, values))
    }

    /// Returns the module these outputs belong to.
    pub fn module(&self) -> &Path {
        &self.module
    }

    /// Returns the output names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Returns a published output, failing if it is absent or null.
    pub fn require(&self, name: &str) -> Result<&Value> {
        match self.values.get(name) {
            Some(Value::Null) | None => Err(Error::MissingOutput {
                module: self.module.clone(),
                name: name.to_string(),
            }),
            Some(value) => Ok(value),
        }
    }

    /// Returns a published output that must be a non-empty string.
    pub fn require_string(&self, name: &str) -> Result<&str> {
        match self.require(name)? {
            Value::String(s) if !s.is_empty() => Ok(s.as_str()),
            Value::String(_) => Err(Error::MissingOutput {
                module: self.module.clone(),
                name: name.to_string(),
            }),
            other => Err(self.malformed(name, format!("expected a string, found {}", other))),
        }
    }

    /// Decodes an output as a map of resource descriptors.
    pub fn resource_map(&self, name: &str) -> Result<ResourceMap> {
        let value = self.require(name)?;
        serde_json::from_value(value.clone())
            .map_err(|e| self.malformed(name, format!("not a resource map: {}", e)))
    }

    /// Looks up `resource` in the resource map `output`, requiring a non-empty id.
    pub fn require_resource(&self, output: &str, resource: &str) -> Result<ResourceDescriptor> {
        let mut map = self.resource_map(output)?;
        match map.remove(resource) {
            Some(descriptor) if !descriptor.id.is_empty() => Ok(descriptor),
            _ => Err(Error::MissingOutput {
                module: self.module.clone(),
                name: format!("{}.{}.id", output, resource),
            }),
        }
    }

    fn malformed(&self, name: &str, reason: String) -> Error {
        Error::MalformedOutput {
            module: self.module.clone(),
            name: name.to_string(),
            reason,
        }
    }
}
