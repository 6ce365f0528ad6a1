// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Condition / Switch / ForEach evaluators (spec §4.4). Evaluated
//! immediately before step execution, after the step's regular `input` is
//! resolved, against the same context snapshot.

use crate::context::ContextSnapshot;
use crate::error::{OrchestratorError, Result};
use crate::model::{ForEachSpec, SwitchSpec};
use crate::template::resolve_string;
use serde_json::Value;

/// Evaluates `step.condition`. A non-boolean result is a hard error; a
/// `false` result is the caller's cue to mark the step Skipped.
///
/// Bare `true`/`false` literals (no `{{ }}` wrapping) are accepted directly,
/// since `resolve_string` passes a brace-less string through unresolved —
/// a condition is never meant to be taken as literal text.
pub fn evaluate_condition(expr: &str, snapshot: &ContextSnapshot) -> Result<bool> {
    match expr.trim() {
        "true" => return Ok(true),
        "false" => return Ok(false),
        _ => {}
    }
    match resolve_string(expr, snapshot)? {
        Value::Bool(b) => Ok(b),
        other => Err(OrchestratorError::ConditionTypeError(format!(
            "condition '{expr}' resolved to non-boolean value {other}"
        ))),
    }
}

/// Value-equality rule for `switch` per spec §4.4 / SPEC_FULL.md §10:
/// case-insensitive string comparison when both operands are strings,
/// otherwise deep JSON equality.
fn switch_values_match(resolved: &Value, candidate: &Value) -> bool {
    match (resolved.as_str(), candidate.as_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => resolved == candidate,
    }
}

/// Evaluates `step.switch`, returning the effective `taskRef` for this
/// execution. First match in declaration order wins.
pub fn evaluate_switch(step_id: &str, switch: &SwitchSpec, snapshot: &ContextSnapshot) -> Result<String> {
    let resolved_value = resolve_string(&switch.value, snapshot)?;
    for case in &switch.cases {
        if switch_values_match(&resolved_value, &case.match_value) {
            return Ok(case.task_ref.clone());
        }
    }
    if let Some(default) = &switch.default {
        return Ok(default.task_ref.clone());
    }
    Err(OrchestratorError::SwitchNoMatch {
        step_id: step_id.to_string(),
    })
}

/// A resolved forEach fan-out: the concrete items to iterate over and the
/// concurrency bound to run them under.
#[derive(Debug, Clone)]
pub struct ForEachPlan {
    pub items: Vec<Value>,
    pub item_var: String,
    pub max_parallel: usize,
}

/// Resolves `step.forEach.items` and validates it is a JSON array.
/// `maxParallel` omitted means "run all in parallel", modeled as a
/// semaphore sized to the iteration count.
pub fn evaluate_for_each(step_id: &str, spec: &ForEachSpec, snapshot: &ContextSnapshot) -> Result<ForEachPlan> {
    let resolved = resolve_string(&spec.items, snapshot)?;
    let items = match resolved {
        Value::Array(items) => items,
        _ => {
            return Err(OrchestratorError::ForEachItemsNotArray {
                step_id: step_id.to_string(),
            })
        }
    };
    let max_parallel = spec.max_parallel.unwrap_or(items.len()).max(1);
    Ok(ForEachPlan {
        items,
        item_var: spec.item_var.clone(),
        max_parallel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextSnapshot;
    use crate::model::{SwitchCase, SwitchDefault};

    fn snapshot(value: Value) -> ContextSnapshot {
        ContextSnapshot::from_value(serde_json::json!({
            "input": {},
            "tasks": {"lookup": {"output": {"kind": value}}},
            "forEach": {}
        }))
    }

    #[test]
    fn condition_true_and_false() {
        let snap = snapshot(Value::Null);
        assert!(evaluate_condition("true", &snap).unwrap());
        assert!(!evaluate_condition("false", &snap).unwrap());
    }

    #[test]
    fn condition_non_boolean_errors() {
        let snap = snapshot(Value::Null);
        let err = evaluate_condition("{{ input }}", &snap).unwrap_err();
        assert_eq!(err.kind(), "ConditionTypeError");
    }

    #[test]
    fn switch_routes_case_insensitively() {
        let snap = snapshot(Value::String("Premium".into()));
        let switch = SwitchSpec {
            value: "{{ tasks.lookup.output.kind }}".into(),
            cases: vec![
                SwitchCase { match_value: Value::String("premium".into()), task_ref: "task-p".into() },
                SwitchCase { match_value: Value::String("basic".into()), task_ref: "task-b".into() },
            ],
            default: Some(SwitchDefault { task_ref: "task-d".into() }),
        };
        let effective = evaluate_switch("route", &switch, &snap).unwrap();
        assert_eq!(effective, "task-p");
    }

    #[test]
    fn switch_falls_through_to_default() {
        let snap = snapshot(Value::String("enterprise".into()));
        let switch = SwitchSpec {
            value: "{{ tasks.lookup.output.kind }}".into(),
            cases: vec![SwitchCase { match_value: Value::String("premium".into()), task_ref: "task-p".into() }],
            default: Some(SwitchDefault { task_ref: "task-d".into() }),
        };
        assert_eq!(evaluate_switch("route", &switch, &snap).unwrap(), "task-d");
    }

    #[test]
    fn switch_no_match_and_no_default_fails() {
        let snap = snapshot(Value::String("enterprise".into()));
        let switch = SwitchSpec {
            value: "{{ tasks.lookup.output.kind }}".into(),
            cases: vec![SwitchCase { match_value: Value::String("premium".into()), task_ref: "task-p".into() }],
            default: None,
        };
        let err = evaluate_switch("route", &switch, &snap).unwrap_err();
        assert_eq!(err.kind(), "SwitchNoMatch");
    }

    #[test]
    fn switch_non_string_uses_deep_equality() {
        let snap = snapshot(Value::from(2));
        let switch = SwitchSpec {
            value: "{{ tasks.lookup.output.kind }}".into(),
            cases: vec![SwitchCase { match_value: Value::from(2), task_ref: "task-2".into() }],
            default: None,
        };
        assert_eq!(evaluate_switch("route", &switch, &snap).unwrap(), "task-2");
    }

    #[test]
    fn for_each_resolves_array_and_default_parallelism() {
        let snap = ContextSnapshot::from_value(serde_json::json!({
            "input": {"items": [1, 2, 3]}, "tasks": {}, "forEach": {}
        }));
        let spec = ForEachSpec {
            items: "{{ input.items }}".into(),
            item_var: "item".into(),
            max_parallel: None,
        };
        let plan = evaluate_for_each("step", &spec, &snap).unwrap();
        assert_eq!(plan.items.len(), 3);
        assert_eq!(plan.max_parallel, 3);
    }

    #[test]
    fn for_each_rejects_non_array() {
        let snap = ContextSnapshot::from_value(serde_json::json!({
            "input": {"items": "nope"}, "tasks": {}, "forEach": {}
        }));
        let spec = ForEachSpec {
            items: "{{ input.items }}".into(),
            item_var: "item".into(),
            max_parallel: None,
        };
        let err = evaluate_for_each("step", &spec, &snap).unwrap_err();
        assert_eq!(err.kind(), "ForEachItemsNotArray");
    }
}
