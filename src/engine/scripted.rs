//! Scripted engine that records every call, for lifecycle tests.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;

use super::{EngineOp, EngineOutput, EngineRequest, InfraEngine};

type Hook = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: EngineOp,
    pub request: EngineRequest,
}

/// Engine returning canned outputs keyed by operation and module directory.
///
/// Unscripted calls succeed with empty output, except `Output` which
/// returns an empty JSON object.
#[derive(Default)]
pub struct ScriptedEngine {
    responses: Mutex<HashMap<(EngineOp, PathBuf), EngineOutput>>,
    hooks: Mutex<HashMap<(EngineOp, PathBuf), Hook>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the output of `op` against `module`.
    pub fn respond(self, op: EngineOp, module: impl Into<PathBuf>, output: EngineOutput) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((op, module.into()), output);
        self
    }

    /// Runs `hook` before answering `op` against `module`.
    pub fn on_call<F, Fut>(self, op: EngineOp, module: impl Into<PathBuf>, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: Hook = Arc::new(move || Box::pin(hook()));
        self.hooks.lock().unwrap().insert((op, module.into()), hook);
        self
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns the modules `op` was run against, in call order.
    pub fn modules_for(&self, op: EngineOp) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == op)
            .map(|c| c.request.module_dir)
            .collect()
    }

    /// Counts calls of `op` against `module`.
    pub fn count(&self, op: EngineOp, module: impl AsRef<Path>) -> usize {
        self.modules_for(op)
            .iter()
            .filter(|m| m.as_path() == module.as_ref())
            .count()
    }
}

#[async_trait]
impl InfraEngine for ScriptedEngine {
    async fn run(&self, op: EngineOp, request: &EngineRequest) -> Result<EngineOutput> {
        self.calls.lock().unwrap().push(Call {
            op,
            request: request.clone(),
        });

        let key = (op, request.module_dir.clone());
        let hook = self.hooks.lock().unwrap().get(&key).cloned();
        if let Some(hook) = hook {
            hook().await;
        }

        let scripted = self.responses.lock().unwrap().get(&key).cloned();
        Ok(scripted.unwrap_or_else(|| match op {
            EngineOp::Output => EngineOutput::success("{}"),
            _ => EngineOutput::success(""),
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
