// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Orchestrator: the central driver (spec §4.6) and Sub-workflow Linker
//! (spec §4.9). Runs a workflow level-by-level over the graph from
//! [`crate::graph`], dispatching each level's steps as concurrent tasks
//! and joining before advancing.

use crate::catalog::Catalog;
use crate::context::{ContextSnapshot, ExecutionContext};
use crate::control_flow::{self, ForEachPlan};
use crate::error::{OrchestratorError, Result};
use crate::executor::TaskExecutor;
use crate::graph::WorkflowGraph;
use crate::metrics;
use crate::model::{CatalogKey, ForEachSpec, Step, WorkflowDefinition};
use crate::notifier::{EventNotifier, StepOutcome};
use crate::record::{ExecutionRecord, RunStatus, SkipReason, StepResult, StepStatus};
use crate::schema;
use crate::template;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

/// Issues [`CancelSignal`]s and trips them. One token per run; cloned into
/// every step dispatch and threaded through sub-workflow recursion (spec
/// §5, "a per-run cancellation token is threaded into every executor").
pub struct CancellationToken {
    tx: watch::Sender<bool>,
}

impl CancellationToken {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal(rx))
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// The read side of a [`CancellationToken`].
#[derive(Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// A signal that never fires, for callers that don't need cancellation.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the token is cancelled; never resolves otherwise (even
    /// if the issuing [`CancellationToken`] is dropped).
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// One step's dispatch outcome before it is folded into a [`StepResult`].
struct StepDispatchOutcome {
    output: std::result::Result<Value, OrchestratorError>,
    attempts: u32,
    http_status: Option<u16>,
    resolved_url: Option<String>,
    quality_score: Option<f64>,
}

impl StepDispatchOutcome {
    fn ok(value: Value) -> Self {
        Self {
            output: Ok(value),
            attempts: 1,
            http_status: None,
            resolved_url: None,
            quality_score: None,
        }
    }

    fn error(err: OrchestratorError) -> Self {
        Self {
            output: Err(err),
            attempts: 1,
            http_status: None,
            resolved_url: None,
            quality_score: None,
        }
    }
}

/// `taskRef`/`workflowRef` resolve as `namespace/name`, falling back to the
/// referencing workflow's own namespace when unqualified.
fn parse_ref(reference: &str, default_namespace: &str) -> CatalogKey {
    match reference.split_once('/') {
        Some((ns, name)) => CatalogKey::new(ns, name),
        None => CatalogKey::new(default_namespace, reference),
    }
}

fn resolve_step_input(step: &Step, snapshot: &ContextSnapshot) -> Result<Value> {
    let mut obj = serde_json::Map::with_capacity(step.input.len());
    for (key, template_value) in &step.input {
        obj.insert(key.clone(), template::resolve_value(template_value, snapshot)?);
    }
    Ok(Value::Object(obj))
}

/// A dependency that gates this step's dispatch: `Succeeded` and
/// `Skipped(ConditionFalse)` are satisfied; `Failed` (without
/// `continueOnFailure`) and `Skipped(UpstreamFailed)` block it
/// (SPEC_FULL.md §10 decision 5).
fn dependency_blocks(dep_result: &StepResult, dep_continue_on_failure: bool) -> bool {
    match dep_result.status {
        StepStatus::Succeeded => false,
        StepStatus::Skipped => matches!(dep_result.skip_reason, Some(SkipReason::UpstreamFailed)),
        StepStatus::Failed => !dep_continue_on_failure,
        StepStatus::Pending | StepStatus::Running => true,
    }
}

/// Central driver. Cheap to clone (every field is an `Arc`); typically held
/// as `Arc<Orchestrator>` so step dispatch and sub-workflow recursion can
/// spawn `'static` tasks.
#[derive(Clone)]
pub struct Orchestrator {
    catalog: Arc<dyn Catalog>,
    executor: Arc<TaskExecutor>,
    notifier: Arc<dyn EventNotifier>,
    max_sub_workflow_depth: usize,
}

impl Orchestrator {
    pub fn new(catalog: Arc<dyn Catalog>, executor: Arc<TaskExecutor>, notifier: Arc<dyn EventNotifier>) -> Self {
        Self {
            catalog,
            executor,
            notifier,
            max_sub_workflow_depth: 10,
        }
    }

    pub fn with_max_sub_workflow_depth(mut self, max_depth: usize) -> Self {
        self.max_sub_workflow_depth = max_depth;
        self
    }

    /// Runs `workflow` to completion with no cancellation support.
    pub async fn run(self: &Arc<Self>, workflow: &WorkflowDefinition, input: Value) -> Result<ExecutionRecord> {
        self.run_with_cancellation(workflow, input, CancelSignal::never()).await
    }

    /// Runs `workflow` to completion, honoring `cancel` (spec §4.6
    /// "Cancellation").
    pub async fn run_with_cancellation(
        self: &Arc<Self>,
        workflow: &WorkflowDefinition,
        input: Value,
        cancel: CancelSignal,
    ) -> Result<ExecutionRecord> {
        self.clone()
            .run_inner(Arc::new(workflow.clone()), input, 0, Arc::new(HashSet::new()), cancel)
            .await
    }

    /// Boxed for recursion: a sub-workflow step re-enters this same
    /// function with `depth + 1` and an extended call-stack set.
    fn run_inner(
        self: Arc<Self>,
        workflow: Arc<WorkflowDefinition>,
        input: Value,
        depth: usize,
        stack: Arc<HashSet<(String, String)>>,
        cancel: CancelSignal,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionRecord>> + Send>> {
        Box::pin(async move {
            // Step 1: validate workflow input.
            let (validation, filled_input, suggested_prompt) =
                schema::validate_workflow_input(&workflow.input_schema, &input);
            if !validation.is_valid() {
                return Err(OrchestratorError::InputValidationError(
                    suggested_prompt.unwrap_or_else(|| "workflow input failed validation".to_string()),
                ));
            }

            // Step 2: build the dependency graph; fails fast on cycles.
            let graph = WorkflowGraph::build(&workflow)?;

            // Step 3: create the execution record, emit WorkflowStarted.
            let mut record = ExecutionRecord::new(workflow.name.clone(), filled_input.clone());
            self.notifier
                .on_workflow_started(record.id, &workflow.name, record.started_at)
                .await;

            let context = Arc::new(ExecutionContext::new(filled_input));
            let results: DashMap<String, StepResult> = DashMap::new();
            let default_namespace = workflow.namespace.clone();

            // Step 4: level-by-level dispatch.
            for level in &graph.levels {
                if cancel.is_cancelled() {
                    break;
                }

                let mut handles = Vec::new();
                for step_id in level {
                    let step = workflow
                        .step(step_id)
                        .expect("graph levels are derived from workflow.tasks")
                        .clone();

                    if cancel.is_cancelled() {
                        results.insert(step.id.clone(), cancelled_result(&step.id));
                        context.set_null_output(&step.id);
                        continue;
                    }

                    let blocked = step.depends_on.iter().any(|dep_id| match results.get(dep_id) {
                        Some(dep_result) => {
                            let dep_continue_on_failure =
                                workflow.step(dep_id).map(|s| s.continue_on_failure).unwrap_or(false);
                            dependency_blocks(&dep_result, dep_continue_on_failure)
                        }
                        None => true,
                    });
                    if blocked {
                        results.insert(step.id.clone(), upstream_skipped_result(&step.id));
                        context.set_null_output(&step.id);
                        continue;
                    }

                    let this = self.clone();
                    let context = Arc::clone(&context);
                    let stack = Arc::clone(&stack);
                    let cancel = cancel.clone();
                    let default_namespace = default_namespace.clone();
                    let record_id = record.id;
                    handles.push(tokio::spawn(async move {
                        this.dispatch_step(step, context, depth, stack, cancel, default_namespace, record_id)
                            .await
                    }));
                }

                for handle in handles {
                    match handle.await {
                        Ok(step_result) => {
                            results.insert(step_result.step_id.clone(), step_result);
                        }
                        Err(join_err) => {
                            warn!(error = %join_err, "step task terminated abnormally");
                        }
                    }
                }
            }

            // Step 6: finalize.
            record.step_results = workflow
                .tasks
                .iter()
                .filter_map(|s| results.get(&s.id).map(|r| r.value().clone()))
                .collect();

            let cancelled = cancel.is_cancelled();
            let failed = record.step_results.iter().any(|r| match r.status {
                StepStatus::Failed => {
                    !workflow.step(&r.step_id).map(|s| s.continue_on_failure).unwrap_or(false)
                }
                StepStatus::Skipped => matches!(r.skip_reason, Some(SkipReason::UpstreamFailed)),
                _ => false,
            });
            record.status = if cancelled {
                RunStatus::Cancelled
            } else if failed {
                RunStatus::Failed
            } else {
                RunStatus::Succeeded
            };

            let final_snapshot = context.snapshot();
            let mut output_obj = serde_json::Map::with_capacity(workflow.output_mapping.len());
            for (key, expr) in &workflow.output_mapping {
                match template::resolve_string(expr, &final_snapshot) {
                    Ok(value) => {
                        output_obj.insert(key.clone(), value);
                    }
                    Err(e) => {
                        warn!(key, error = %e, "output mapping entry failed to resolve");
                        output_obj.insert(key.clone(), Value::Null);
                    }
                }
            }
            record.output = Some(Value::Object(output_obj));
            record.completed_at = Some(Utc::now());

            self.notifier
                .on_workflow_completed(record.id, record.status, record.duration_ms(), record.completed_at.unwrap())
                .await;
            metrics::record_workflow(record.status, record.duration_ms());

            Ok(record)
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_step(
        self: Arc<Self>,
        step: Step,
        context: Arc<ExecutionContext>,
        depth: usize,
        stack: Arc<HashSet<(String, String)>>,
        cancel: CancelSignal,
        default_namespace: String,
        record_id: Uuid,
    ) -> StepResult {
        let started_at = Utc::now();
        let base_snapshot = context.snapshot();

        if let Some(condition) = &step.condition {
            match control_flow::evaluate_condition(condition, &base_snapshot) {
                Ok(true) => {}
                Ok(false) => {
                    return self
                        .finish_skipped_or_failed(
                            &step, context, record_id, started_at, StepStatus::Skipped, None, Some(SkipReason::ConditionFalse),
                        )
                        .await;
                }
                Err(e) => {
                    return self
                        .finish_skipped_or_failed(&step, context, record_id, started_at, StepStatus::Failed, Some(e), None)
                        .await;
                }
            }
        }

        let effective_task_ref = if let Some(switch) = &step.switch {
            match control_flow::evaluate_switch(&step.id, switch, &base_snapshot) {
                Ok(task_ref) => Some(task_ref),
                Err(e) => {
                    return self
                        .finish_skipped_or_failed(&step, context, record_id, started_at, StepStatus::Failed, Some(e), None)
                        .await;
                }
            }
        } else {
            step.task_ref.clone()
        };

        self.notifier
            .on_step_started(record_id, &step.id, effective_task_ref.as_deref(), started_at)
            .await;

        let outcome = if let Some(for_each) = step.for_each.clone() {
            self.clone()
                .dispatch_for_each(
                    step.clone(),
                    for_each,
                    effective_task_ref.clone(),
                    base_snapshot,
                    default_namespace,
                    depth,
                    stack,
                    cancel,
                )
                .await
        } else {
            self.clone()
                .dispatch_single(&step, effective_task_ref.as_deref(), &base_snapshot, &default_namespace, depth, &stack, &cancel)
                .await
        };

        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        let status = if outcome.output.is_ok() { StepStatus::Succeeded } else { StepStatus::Failed };

        context.set_output(&step.id, outcome.output.clone().unwrap_or(Value::Null));

        let step_outcome = match &outcome.output {
            Ok(v) => StepOutcome::Output(v),
            Err(e) => StepOutcome::Error(e),
        };
        self.notifier
            .on_step_completed(record_id, &step.id, status, step_outcome, duration_ms, completed_at)
            .await;
        metrics::record_step(status, duration_ms);

        let (output, error) = match outcome.output {
            Ok(v) => (Some(v), None),
            Err(e) => (None, Some(e)),
        };

        StepResult {
            step_id: step.id.clone(),
            effective_task_ref,
            status,
            output,
            error,
            skip_reason: None,
            started_at,
            completed_at: Some(completed_at),
            attempts: outcome.attempts,
            http_status: outcome.http_status,
            resolved_url: outcome.resolved_url,
            quality_score: outcome.quality_score,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_skipped_or_failed(
        &self,
        step: &Step,
        context: Arc<ExecutionContext>,
        record_id: Uuid,
        started_at: chrono::DateTime<Utc>,
        status: StepStatus,
        error: Option<OrchestratorError>,
        skip_reason: Option<SkipReason>,
    ) -> StepResult {
        context.set_null_output(&step.id);
        self.notifier.on_step_started(record_id, &step.id, None, started_at).await;
        let completed_at = Utc::now();
        let null_value = Value::Null;
        let outcome_ref = match &error {
            Some(e) => StepOutcome::Error(e),
            None => StepOutcome::Output(&null_value),
        };
        self.notifier
            .on_step_completed(record_id, &step.id, status, outcome_ref, 0, completed_at)
            .await;
        metrics::record_step(status, 0);
        StepResult {
            step_id: step.id.clone(),
            effective_task_ref: None,
            status,
            output: None,
            error,
            skip_reason,
            started_at,
            completed_at: Some(completed_at),
            attempts: 0,
            http_status: None,
            resolved_url: None,
            quality_score: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_for_each(
        self: Arc<Self>,
        step: Step,
        spec: ForEachSpec,
        effective_task_ref: Option<String>,
        base_snapshot: ContextSnapshot,
        default_namespace: String,
        depth: usize,
        stack: Arc<HashSet<(String, String)>>,
        cancel: CancelSignal,
    ) -> Pin<Box<dyn Future<Output = StepDispatchOutcome> + Send>> {
        Box::pin(async move {
            let plan: ForEachPlan = match control_flow::evaluate_for_each(&step.id, &spec, &base_snapshot) {
                Ok(p) => p,
                Err(e) => return StepDispatchOutcome::error(e),
            };

            let semaphore = Arc::new(tokio::sync::Semaphore::new(plan.max_parallel));
            let mut handles = Vec::with_capacity(plan.items.len());
            for (index, item) in plan.items.into_iter().enumerate() {
                let iteration_snapshot = base_snapshot.with_for_each_binding(&plan.item_var, item, index);
                let this = self.clone();
                let step = step.clone();
                let effective_task_ref = effective_task_ref.clone();
                let default_namespace = default_namespace.clone();
                let stack = Arc::clone(&stack);
                let cancel = cancel.clone();
                let semaphore = Arc::clone(&semaphore);
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                    this.dispatch_single(
                        &step,
                        effective_task_ref.as_deref(),
                        &iteration_snapshot,
                        &default_namespace,
                        depth,
                        &stack,
                        &cancel,
                    )
                    .await
                }));
            }

            let mut outputs = Vec::with_capacity(handles.len());
            let mut first_error = None;
            let mut total_attempts = 0u32;
            for handle in handles {
                match handle.await {
                    Ok(outcome) => {
                        total_attempts += outcome.attempts;
                        match outcome.output {
                            Ok(v) => outputs.push(v),
                            Err(e) => {
                                outputs.push(Value::Null);
                                first_error.get_or_insert(e);
                            }
                        }
                    }
                    Err(join_err) => {
                        outputs.push(Value::Null);
                        first_error.get_or_insert(OrchestratorError::Other(format!(
                            "forEach iteration terminated abnormally: {join_err}"
                        )));
                    }
                }
            }

            match first_error {
                Some(e) => StepDispatchOutcome {
                    output: Err(e),
                    attempts: total_attempts.max(1),
                    http_status: None,
                    resolved_url: None,
                    quality_score: None,
                },
                None => StepDispatchOutcome {
                    output: Ok(Value::Array(outputs)),
                    attempts: total_attempts.max(1),
                    http_status: None,
                    resolved_url: None,
                    quality_score: None,
                },
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_single<'a>(
        self: Arc<Self>,
        step: &'a Step,
        effective_task_ref: Option<&'a str>,
        snapshot: &'a ContextSnapshot,
        default_namespace: &'a str,
        depth: usize,
        stack: &'a Arc<HashSet<(String, String)>>,
        cancel: &'a CancelSignal,
    ) -> Pin<Box<dyn Future<Output = StepDispatchOutcome> + Send + 'a>> {
        Box::pin(async move {
            if let Some(workflow_ref) = &step.workflow_ref {
                self.dispatch_sub_workflow(step, workflow_ref, snapshot, default_namespace, depth, stack, cancel)
                    .await
            } else {
                self.dispatch_task(step, effective_task_ref, snapshot, default_namespace, cancel).await
            }
        })
    }

    async fn dispatch_task(
        &self,
        step: &Step,
        effective_task_ref: Option<&str>,
        snapshot: &ContextSnapshot,
        default_namespace: &str,
        cancel: &CancelSignal,
    ) -> StepDispatchOutcome {
        let task_ref = match effective_task_ref {
            Some(r) => r,
            None => {
                return StepDispatchOutcome::error(OrchestratorError::InvalidStepConfig {
                    step_id: step.id.clone(),
                    reason: "step has neither 'taskRef' nor a resolvable 'switch' case".to_string(),
                })
            }
        };

        let key = parse_ref(task_ref, default_namespace);
        let task = match self.catalog.get_task(&key) {
            Some(t) => t,
            None => return StepDispatchOutcome::error(OrchestratorError::TaskNotFound { reference: task_ref.to_string() }),
        };

        let resolved_input = match resolve_step_input(step, snapshot) {
            Ok(v) => v,
            Err(e) => return StepDispatchOutcome::error(e),
        };

        let validation = schema::validate(&task.input_schema, &resolved_input);
        if !validation.is_valid() {
            let details = validation
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.field_path, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return StepDispatchOutcome::error(OrchestratorError::InputSchemaViolation {
                step_id: step.id.clone(),
                details,
            });
        }

        if cancel.is_cancelled() {
            return StepDispatchOutcome::error(OrchestratorError::Cancelled);
        }

        let cancel_wait = cancel.clone();
        tokio::select! {
            _ = cancel_wait.cancelled() => StepDispatchOutcome::error(OrchestratorError::Cancelled),
            outcome = self.executor.execute(&task, resolved_input) => StepDispatchOutcome {
                output: outcome.output,
                attempts: outcome.attempts,
                http_status: outcome.http_status,
                resolved_url: outcome.resolved_url,
                quality_score: outcome.quality_score,
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_sub_workflow(
        &self,
        step: &Step,
        workflow_ref: &str,
        snapshot: &ContextSnapshot,
        default_namespace: &str,
        depth: usize,
        stack: &Arc<HashSet<(String, String)>>,
        cancel: &CancelSignal,
    ) -> StepDispatchOutcome {
        if depth + 1 > self.max_sub_workflow_depth {
            return StepDispatchOutcome::error(OrchestratorError::SubWorkflowTooDeep {
                max_depth: self.max_sub_workflow_depth,
            });
        }

        let key = parse_ref(workflow_ref, default_namespace);
        if stack.contains(&(key.namespace.clone(), key.name.clone())) {
            return StepDispatchOutcome::error(OrchestratorError::SubWorkflowCycle {
                reference: workflow_ref.to_string(),
            });
        }

        let nested_workflow = match self.catalog.get_workflow(&key) {
            Some(w) => w,
            None => return StepDispatchOutcome::error(OrchestratorError::TaskNotFound { reference: workflow_ref.to_string() }),
        };

        let resolved_input = match resolve_step_input(step, snapshot) {
            Ok(v) => v,
            Err(e) => return StepDispatchOutcome::error(e),
        };

        let mut nested_stack = (**stack).clone();
        nested_stack.insert((key.namespace, key.name));

        // `continueOnFailure` on this step does not propagate into the
        // nested run's own steps (SPEC_FULL.md §10 decision 1) — the
        // nested workflow uses its own steps' flags, unaffected by ours.
        let this = Arc::new(self.clone());
        let result = this
            .run_inner(Arc::new(nested_workflow), resolved_input, depth + 1, Arc::new(nested_stack), cancel.clone())
            .await;

        match result {
            Ok(record) if matches!(record.status, RunStatus::Succeeded) => {
                StepDispatchOutcome::ok(record.output.unwrap_or(Value::Null))
            }
            Ok(record) => StepDispatchOutcome::error(OrchestratorError::Other(format!(
                "sub-workflow '{workflow_ref}' ended with status {:?}",
                record.status
            ))),
            Err(e) => StepDispatchOutcome::error(e),
        }
    }
}

fn cancelled_result(step_id: &str) -> StepResult {
    let now = Utc::now();
    StepResult {
        step_id: step_id.to_string(),
        effective_task_ref: None,
        status: StepStatus::Failed,
        output: None,
        error: Some(OrchestratorError::Cancelled),
        skip_reason: None,
        started_at: now,
        completed_at: Some(now),
        attempts: 0,
        http_status: None,
        resolved_url: None,
        quality_score: None,
    }
}

fn upstream_skipped_result(step_id: &str) -> StepResult {
    let now = Utc::now();
    StepResult {
        step_id: step_id.to_string(),
        effective_task_ref: None,
        status: StepStatus::Skipped,
        output: None,
        error: None,
        skip_reason: Some(SkipReason::UpstreamFailed),
        started_at: now,
        completed_at: Some(now),
        attempts: 0,
        http_status: None,
        resolved_url: None,
        quality_score: None,
    }
}
