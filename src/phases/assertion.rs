//! Expected-failure plan checks.
//!
//! The assertions module deliberately violates the module's input validation
//! rules. The phase passes only if the plan fails and its output contains
//! every expected diagnostic phrase. Matching is plain substring containment,
//! so it follows the engine's wording.

use crate::context::ModuleBinding;
use crate::error::{Error, Result};
use crate::invoker::ModuleInvoker;

/// Diagnostics raised by the assertions module of the subnet module.
pub fn default_expected_diagnostics() -> Vec<String> {
    [
        "Unknown subnet variable assigned",
        "'s generated name is too long:",
        "does not match regex",
        "like a VPN tunnel",
        "supply ONE nexthop",
        "subnet [no-role] has purpose [INTERNAL_HTTPS_LOAD_BALANCING] defined without",
        "subnet [role-with-wrong-purpose] has role [ACTIVE] defined while the 'purpose'",
        "subnet [invalid-purpose]'s purpose [trigger-invalid] does not match",
        "subnet [invalid-role]'s role [trigger-invalid] does not match",
        "minimum is /26 for subnets with purpose INTERNAL_HTTPS",
        "is too small or invalid, minimum is /29",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Returns the expected phrases missing from `output`.
pub fn missing_diagnostics<'a>(output: &str, expected: &'a [String]) -> Vec<&'a str> {
    expected
        .iter()
        .map(String::as_str)
        .filter(|phrase| !output.contains(phrase))
        .collect()
}

/// Runs expected-failure plans.
pub struct AssertionRunner {
    invoker: ModuleInvoker,
}

impl AssertionRunner {
    /// Creates a runner over the given invoker.
    pub fn new(invoker: ModuleInvoker) -> Self {
        Self { invoker }
    }

    /// Plans `binding` and checks that it fails with every phrase in `required`.
    pub async fn run_assertions(&self, binding: &ModuleBinding, required: &[String]) -> Result<()> {
        let outcome = self.invoker.plan_only(binding).await;

        if outcome.succeeded() {
            return Err(Error::PlanValidation(format!(
                "plan of {} succeeded but was expected to fail",
                binding.module_dir.display()
            )));
        }

        // Failing to run the engine at all says nothing about validation.
        if let Some(e @ (Error::Engine(_) | Error::EngineTimeout { .. })) = outcome.error {
            return Err(e);
        }

        let missing = missing_diagnostics(&outcome.output, required);
        if !missing.is_empty() {
            return Err(Error::PlanValidation(format!(
                "plan of {} is missing {} of {} expected diagnostics:\n  - {}\nplan output:\n{}",
                binding.module_dir.display(),
                missing.len(),
                required.len(),
                missing.join("\n  - "),
                outcome.output
            )));
        }

        tracing::info!(
            module = ?binding.module_dir,
            checked = required.len(),
            "all expected diagnostics present"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::RunContext;
    use crate::engine::scripted::ScriptedEngine;
    use crate::engine::{EngineOp, EngineOutput};

    /// Plan output of a module tripping every validation rule.
    fn malformed_plan_output() -> String {
        [
            "Error: Invalid value for variable",
            "  Unknown subnet variable assigned: [colour]",
            "Error: subnet [a-very-long-subnet-name-that-goes-on]'s generated name is too long: 71 > 63",
            "Error: subnet [Invalid_Name]'s generated name [Invalid_Name] does not match regex ^[a-z]",
            "Error: route [to-vpn] looks like a VPN tunnel but does not define both tunnel fields",
            "Error: route [hops] must supply ONE nexthop",
            "Error: subnet [no-role] has purpose [INTERNAL_HTTPS_LOAD_BALANCING] defined without a role",
            "Error: subnet [role-with-wrong-purpose] has role [ACTIVE] defined while the 'purpose' is not INTERNAL_HTTPS_LOAD_BALANCING",
            "Error: subnet [invalid-purpose]'s purpose [trigger-invalid] does not match any known purpose",
            "Error: subnet [invalid-role]'s role [trigger-invalid] does not match ACTIVE or BACKUP",
            "Error: subnet [proxy]'s cidr is too small, minimum is /26 for subnets with purpose INTERNAL_HTTPS_LOAD_BALANCING",
            "Error: subnet [tiny]'s cidr /30 is too small or invalid, minimum is /29",
        ]
        .join("\n")
    }

    fn binding() -> ModuleBinding {
        RunContext::with_environment("terratest abc", Vec::new(), "proj")
            .bind("assertions", "europe-west1")
    }

    fn runner(plan: EngineOutput) -> AssertionRunner {
        let engine = ScriptedEngine::new().respond(EngineOp::Plan, "assertions", plan);
        AssertionRunner::new(ModuleInvoker::new(Arc::new(engine)))
    }

    #[tokio::test]
    async fn malformed_module_reports_every_diagnostic() {
        let runner = runner(EngineOutput::failure(malformed_plan_output()));
        runner
            .run_assertions(&binding(), &default_expected_diagnostics())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn successful_plan_is_a_validation_failure() {
        let runner = runner(EngineOutput::success("No changes."));
        let err = runner
            .run_assertions(&binding(), &default_expected_diagnostics())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PlanValidation(ref msg) if msg.contains("expected to fail")));
    }

    #[tokio::test]
    async fn partial_match_fails_and_names_missing_phrases() {
        let output = malformed_plan_output().replace("supply ONE nexthop", "supply a nexthop");
        let runner = runner(EngineOutput::failure(output));

        let err = runner
            .run_assertions(&binding(), &default_expected_diagnostics())
            .await
            .unwrap_err();

        match err {
            Error::PlanValidation(msg) => {
                assert!(msg.contains("missing 1 of 11"));
                assert!(msg.contains("supply ONE nexthop"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn matching_is_order_independent() {
        let expected = vec!["second".to_string(), "first".to_string()];
        assert!(missing_diagnostics("first then second", &expected).is_empty());
        assert_eq!(missing_diagnostics("first only", &expected), vec!["second"]);
    }
}
