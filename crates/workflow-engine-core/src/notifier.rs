// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Event Notifier: the injectable lifecycle-callback sink (spec §4.7).
//!
//! The orchestrator only ever calls *into* a notifier; a notifier never
//! calls back into the orchestrator (spec §9, "keep a one-way dependency").
//! Callbacks are wrapped by the orchestrator in an error-swallowing
//! invocation so a notifier failure never fails a workflow.

use crate::error::OrchestratorError;
use crate::record::{RunStatus, StepStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome passed to `on_step_completed`: either the step's recorded
/// output, or the error that failed it.
#[derive(Debug, Clone)]
pub enum StepOutcome<'a> {
    Output(&'a Value),
    Error(&'a OrchestratorError),
}

/// Lifecycle callback sink. Implementations may be synchronous (blocking
/// the orchestrator) or buffered — both are valid per spec §4.7.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn on_workflow_started(&self, run_id: Uuid, workflow_name: &str, ts: DateTime<Utc>) {
        let _ = (run_id, workflow_name, ts);
    }

    async fn on_step_started(&self, run_id: Uuid, step_id: &str, effective_task_ref: Option<&str>, ts: DateTime<Utc>) {
        let _ = (run_id, step_id, effective_task_ref, ts);
    }

    async fn on_step_completed(
        &self,
        run_id: Uuid,
        step_id: &str,
        status: StepStatus,
        outcome: StepOutcome<'_>,
        duration_ms: u64,
        ts: DateTime<Utc>,
    ) {
        let _ = (run_id, step_id, status, outcome, duration_ms, ts);
    }

    async fn on_workflow_completed(&self, run_id: Uuid, status: RunStatus, duration_ms: u64, ts: DateTime<Utc>) {
        let _ = (run_id, status, duration_ms, ts);
    }
}

/// The "null notifier is a no-op" case from spec §4.7.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl EventNotifier for NoopNotifier {}

/// Logs every callback through `tracing`, at the same levels the task
/// executor already uses for step lifecycle logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl EventNotifier for TracingNotifier {
    async fn on_workflow_started(&self, run_id: Uuid, workflow_name: &str, _ts: DateTime<Utc>) {
        info!(%run_id, workflow_name, "workflow started");
    }

    async fn on_step_started(&self, run_id: Uuid, step_id: &str, effective_task_ref: Option<&str>, _ts: DateTime<Utc>) {
        debug!(%run_id, step_id, effective_task_ref, "step started");
    }

    async fn on_step_completed(
        &self,
        run_id: Uuid,
        step_id: &str,
        status: StepStatus,
        outcome: StepOutcome<'_>,
        duration_ms: u64,
        _ts: DateTime<Utc>,
    ) {
        match (status, &outcome) {
            (StepStatus::Failed, StepOutcome::Error(err)) => {
                warn!(%run_id, step_id, duration_ms, error = %err, "step failed");
            }
            _ => {
                debug!(%run_id, step_id, ?status, duration_ms, "step completed");
            }
        }
    }

    async fn on_workflow_completed(&self, run_id: Uuid, status: RunStatus, duration_ms: u64, _ts: DateTime<Utc>) {
        match status {
            RunStatus::Failed => warn!(%run_id, duration_ms, "workflow completed with failures"),
            _ => info!(%run_id, ?status, duration_ms, "workflow completed"),
        }
    }
}
