// crates/wmag-executor/src/binding.rs
// ============================================================================
// Module: Argument Binding
// Description: spec.md §4.5 step 1: substitute references to prior step
// outputs into a step's input, then validate the bound input against the
// action's schema_in.
// ============================================================================

use jsonschema::Draft;
use wmag_core::identifiers::StepId;
use wmag_core::model::step_result::StepResult;

const REF_PREFIX: &str = "$step.";

/// Walks `input`, replacing every string of the form
/// `"$step.<step_id>.output<json-pointer-suffix>"` with the value it points
/// to in `prior_outputs`. A step_id absent from `prior_outputs`, or a
/// pointer that resolves to nothing, is an error: a plan whose
/// `depends_on` is correct should never reference a step that has not run.
///
/// # Errors
/// Returns a human-readable message naming the unresolved reference.
pub fn bind_args(input: &serde_json::Value, prior_outputs: &[(StepId, StepResult)]) -> Result<serde_json::Value, String> {
    match input {
        serde_json::Value::String(s) => resolve_reference(s, prior_outputs),
        serde_json::Value::Array(items) => {
            let mut bound = Vec::with_capacity(items.len());
            for item in items {
                bound.push(bind_args(item, prior_outputs)?);
            }
            Ok(serde_json::Value::Array(bound))
        }
        serde_json::Value::Object(map) => {
            let mut bound = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                bound.insert(key.clone(), bind_args(value, prior_outputs)?);
            }
            Ok(serde_json::Value::Object(bound))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_reference(s: &str, prior_outputs: &[(StepId, StepResult)]) -> Result<serde_json::Value, String> {
    let Some(rest) = s.strip_prefix(REF_PREFIX) else {
        return Ok(serde_json::Value::String(s.to_string()));
    };
    let Some((step_id, suffix)) = rest.split_once(".output") else {
        return Err(format!("malformed step reference: {s}"));
    };
    let result = prior_outputs
        .iter()
        .find(|(id, _)| id.as_str() == step_id)
        .map(|(_, result)| result)
        .ok_or_else(|| format!("reference to unknown or not-yet-completed step: {step_id}"))?;
    let output = result
        .output
        .as_ref()
        .ok_or_else(|| format!("step {step_id} produced no output to reference"))?;
    if suffix.is_empty() {
        return Ok(output.clone());
    }
    output
        .pointer(suffix)
        .cloned()
        .ok_or_else(|| format!("step {step_id} output has no value at pointer {suffix}"))
}

/// Validates `value` against `schema` (JSON Schema, Draft 2020-12).
///
/// # Errors
/// Returns a human-readable message naming the first failing schema rule.
pub fn validate_schema(schema: &serde_json::Value, value: &serde_json::Value) -> Result<(), String> {
    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| format!("invalid schema: {err}"))?;
    if let Err(err) = validator.validate(value) {
        return Err(err.to_string());
    }
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]
mod tests {
    use wmag_core::model::step_result::StepStatus;
    use wmag_core::time::Timestamp;

    use super::*;

    fn succeeded(step_id: &str, output: serde_json::Value) -> (StepId, StepResult) {
        (
            StepId::new(step_id),
            StepResult {
                step_id: StepId::new(step_id),
                idem_key: wmag_core::identifiers::IdemKey::new("k"),
                status: StepStatus::Succeeded,
                output: Some(output),
                error: None,
                retry_class: None,
                attempts: 1,
                policy_ids: vec![],
                recorded_at: Timestamp::from_millis(0),
            },
        )
    }

    #[test]
    fn plain_values_pass_through_unchanged() {
        let input = serde_json::json!({"to": "a@example.com", "count": 3});
        let bound = bind_args(&input, &[]).expect("bind");
        assert_eq!(bound, input);
    }

    #[test]
    fn whole_output_reference_is_substituted() {
        let prior = vec![succeeded("s1", serde_json::json!({"id": "abc"}))];
        let input = serde_json::json!({"prior_id": "$step.s1.output"});
        let bound = bind_args(&input, &prior).expect("bind");
        assert_eq!(bound["prior_id"], serde_json::json!({"id": "abc"}));
    }

    #[test]
    fn pointer_suffix_reaches_into_the_output() {
        let prior = vec![succeeded("s1", serde_json::json!({"id": "abc", "nested": {"value": 7}}))];
        let input = serde_json::json!({"v": "$step.s1.output/nested/value"});
        let bound = bind_args(&input, &prior).expect("bind");
        assert_eq!(bound["v"], serde_json::json!(7));
    }

    #[test]
    fn reference_to_unknown_step_is_an_error() {
        let input = serde_json::json!({"v": "$step.missing.output"});
        let err = bind_args(&input, &[]).expect_err("should fail");
        assert!(err.contains("missing"));
    }

    #[test]
    fn schema_validation_rejects_mismatched_type() {
        let schema = serde_json::json!({"type": "object", "required": ["to"], "properties": {"to": {"type": "string"}}});
        let err = validate_schema(&schema, &serde_json::json!({"to": 5})).expect_err("should fail");
        assert!(!err.is_empty());
    }

    #[test]
    fn schema_validation_accepts_matching_value() {
        let schema = serde_json::json!({"type": "object", "required": ["to"], "properties": {"to": {"type": "string"}}});
        validate_schema(&schema, &serde_json::json!({"to": "a@example.com"})).expect("should pass");
    }
}
