// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Execution Record: the per-run in-memory aggregate returned to the
//! caller (spec §4.8). Mutated by the orchestrator exclusively; terminal
//! at run end. No persistence is this crate's responsibility — an
//! external collaborator subscribes via the [`crate::notifier`] and
//! persists at its own cadence.

use crate::error::OrchestratorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Step lifecycle state (spec §3, §4.6 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Why a step was skipped, used to decide the workflow's terminal status
/// (spec §4.6: "Succeeded only if every non-optional step is Succeeded or
/// Skipped-due-to-false-condition").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    ConditionFalse,
    UpstreamFailed,
}

/// Workflow run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Result of one step's execution (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    /// The task actually executed, after switch evaluation; `None` for a
    /// step that never reached dispatch (e.g. skipped before resolution).
    pub effective_task_ref: Option<String>,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<OrchestratorError>,
    pub skip_reason: Option<SkipReason>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub http_status: Option<u16>,
    pub resolved_url: Option<String>,
    /// Attached by the Task Executor's optional error-quality analyzer
    /// (SPEC_FULL.md §4.5 supplement); `None` when no analyzer is
    /// configured or the step never reached a non-2xx response.
    pub quality_score: Option<f64>,
}

impl StepResult {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            effective_task_ref: None,
            status: StepStatus::Pending,
            output: None,
            error: None,
            skip_reason: None,
            started_at: Utc::now(),
            completed_at: None,
            attempts: 0,
            http_status: None,
            resolved_url: None,
            quality_score: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self.completed_at {
            Some(end) => (end - self.started_at).num_milliseconds().max(0) as u64,
            None => 0,
        }
    }
}

/// Per-run aggregate of step results, timings, and errors (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input: Value,
    pub output: Option<Value>,
    pub step_results: Vec<StepResult>,
}

impl ExecutionRecord {
    pub fn new(workflow_name: impl Into<String>, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_name: workflow_name.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            input,
            output: None,
            step_results: Vec::new(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self.completed_at {
            Some(end) => (end - self.started_at).num_milliseconds().max(0) as u64,
            None => 0,
        }
    }
}
