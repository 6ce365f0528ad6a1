// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Execution context: the per-run mapping of `input.*`, `tasks.<id>.output.*`,
//! and `forEach.*` bindings that templates resolve against.
//!
//! Writes to `tasks.<id>.output` are serialized by a single
//! `parking_lot::RwLock` (spec §5, "shared-resource policy"). Reads taken
//! for step dispatch are snapshots: each step gets an owned `ContextSnapshot`
//! built once before its control-flow/input resolution runs, so a step never
//! observes a write that happens after its own dispatch began.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// An immutable view of the context taken at one instant. Template
/// resolution and the control-flow evaluators only ever see a snapshot,
/// never the live, lockable context.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    root: Value,
}

impl ContextSnapshot {
    /// Looks up a dotted/subscripted path against this snapshot. Returns
    /// `None` when any segment is missing — callers decide whether that is
    /// an error (`TemplateMissingBinding`) or satisfied by a `default` filter.
    pub fn get_path(&self, segments: &[crate::template::PathSegment]) -> Option<&Value> {
        let mut current = &self.root;
        for segment in segments {
            current = match segment {
                crate::template::PathSegment::Key(key) => current.get(key)?,
                crate::template::PathSegment::Index(idx) => current.get(*idx)?,
            };
        }
        Some(current)
    }

    /// Returns a new snapshot with `forEach.<item_var>` and `forEach.index`
    /// bound for one iteration, without mutating the run-level context.
    pub fn with_for_each_binding(&self, item_var: &str, item: Value, index: usize) -> Self {
        let mut root = self.root.clone();
        let for_each = root
            .as_object_mut()
            .expect("context root is always an object")
            .entry("forEach")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(obj) = for_each.as_object_mut() {
            obj.insert(item_var.to_string(), item);
            obj.insert("index".to_string(), Value::from(index));
        }
        Self { root }
    }

    #[cfg(test)]
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Builds the task-local scope a `WorkflowTask`'s own `http`/`transform`
    /// templates resolve against: the step's already-resolved `input` map,
    /// exposed under `input.<field>` so a task's templates read the same
    /// way a workflow step's templates do (spec §4.5).
    pub fn for_task_input(resolved_input: Value) -> Self {
        let mut root = Map::new();
        root.insert("input".to_string(), resolved_input);
        root.insert("tasks".to_string(), Value::Object(Map::new()));
        root.insert("forEach".to_string(), Value::Object(Map::new()));
        Self {
            root: Value::Object(root),
        }
    }
}

/// The mutable, shared context for a single workflow run.
pub struct ExecutionContext {
    input: Value,
    tasks: RwLock<HashMap<String, Value>>,
}

impl ExecutionContext {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Records a step's output. Per spec's invariant, this is called
    /// exactly once per step id per run.
    pub fn set_output(&self, step_id: &str, output: Value) {
        self.tasks.write().insert(step_id.to_string(), output);
    }

    /// Explicitly records a `null` output for a skipped/failed step so
    /// downstream references resolve to `null` rather than being undefined
    /// (spec §8 property 4, "no phantom writes").
    pub fn set_null_output(&self, step_id: &str) {
        self.set_output(step_id, Value::Null);
    }

    pub fn output_of(&self, step_id: &str) -> Option<Value> {
        self.tasks.read().get(step_id).cloned()
    }

    /// Takes an immutable snapshot of the context for one step's dispatch.
    pub fn snapshot(&self) -> ContextSnapshot {
        let tasks_guard = self.tasks.read();
        let mut tasks_obj = Map::new();
        for (step_id, output) in tasks_guard.iter() {
            let mut entry = Map::new();
            entry.insert("output".to_string(), output.clone());
            tasks_obj.insert(step_id.clone(), Value::Object(entry));
        }
        drop(tasks_guard);

        let mut root = Map::new();
        root.insert("input".to_string(), self.input.clone());
        root.insert("tasks".to_string(), Value::Object(tasks_obj));
        root.insert("forEach".to_string(), Value::Object(Map::new()));

        ContextSnapshot {
            root: Value::Object(root),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_writes_before_it_was_taken() {
        let ctx = ExecutionContext::new(serde_json::json!({"userId": 7}));
        ctx.set_output("a", serde_json::json!({"name": "Ada"}));
        let snap = ctx.snapshot();
        assert_eq!(
            snap.root.pointer("/tasks/a/output/name"),
            Some(&Value::String("Ada".to_string()))
        );
        assert_eq!(snap.root.pointer("/input/userId"), Some(&Value::from(7)));
    }

    #[test]
    fn later_writes_do_not_leak_into_an_earlier_snapshot() {
        let ctx = ExecutionContext::new(Value::Null);
        let snap = ctx.snapshot();
        ctx.set_output("a", serde_json::json!({"x": 1}));
        assert!(snap.root.pointer("/tasks/a").is_none());
    }

    #[test]
    fn for_each_binding_does_not_mutate_source() {
        let ctx = ExecutionContext::new(Value::Null);
        let snap = ctx.snapshot();
        let bound = snap.with_for_each_binding("item", Value::from(5), 2);
        assert_eq!(bound.root.pointer("/forEach/item"), Some(&Value::from(5)));
        assert_eq!(bound.root.pointer("/forEach/index"), Some(&Value::from(2)));
        assert!(snap.root.pointer("/forEach/item").is_none());
    }
}
