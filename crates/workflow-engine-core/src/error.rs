// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the workflow execution engine.
//!
//! Every variant here is surfaced verbatim in a `StepResult` or
//! `ExecutionRecord` — no error ever escapes the orchestrator as a Rust
//! panic or exception. See spec §7 for the full taxonomy and policy.

use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Structured error taxonomy for workflow execution.
#[derive(Debug, Error, Clone, serde::Serialize, serde::Deserialize)]
pub enum OrchestratorError {
    /// Workflow input failed schema validation. Fatal, pre-dispatch.
    #[error("workflow input validation failed: {0}")]
    InputValidationError(String),

    /// A cycle was found in the step dependency graph. Fatal, pre-dispatch.
    #[error("dependency graph has a cycle: {0}")]
    GraphCyclic(String),

    /// A template path could not be resolved and no default was supplied.
    #[error("template path '{path}' has no binding")]
    TemplateMissingBinding { path: String },

    /// A template expression was not syntactically valid.
    #[error("malformed template expression: {0}")]
    TemplateMalformed(String),

    /// A `condition` template did not evaluate to a boolean.
    #[error("condition did not evaluate to a boolean: {0}")]
    ConditionTypeError(String),

    /// No `switch` case matched and no `default` was provided.
    #[error("switch step '{step_id}' had no matching case and no default")]
    SwitchNoMatch { step_id: String },

    /// A `forEach.items` template did not resolve to a JSON array.
    #[error("forEach step '{step_id}' items did not resolve to an array")]
    ForEachItemsNotArray { step_id: String },

    /// `taskRef` or `workflowRef` is absent from the catalog.
    #[error("'{reference}' not found in catalog")]
    TaskNotFound { reference: String },

    /// Resolved step input failed the task's declared input schema.
    #[error("input schema violation for step '{step_id}': {details}")]
    InputSchemaViolation { step_id: String, details: String },

    /// Task output failed the task's declared output schema.
    #[error("output schema violation for step '{step_id}': {details}")]
    OutputSchemaViolation { step_id: String, details: String },

    /// Task HTTP response body could not be parsed as JSON.
    #[error("response parse error for step '{step_id}': {details}")]
    ResponseParseError { step_id: String, details: String },

    /// A 4xx response, or a 5xx response after retries were exhausted.
    #[error("http error {status}: {body}")]
    HttpError { status: u16, body: String },

    /// A network-level failure survived retries.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The per-task or per-run deadline elapsed.
    #[error("timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The run was cancelled while the step was running.
    #[error("cancelled")]
    Cancelled,

    /// Sub-workflow recursion exceeded the configured depth cap.
    #[error("sub-workflow nesting exceeded depth {max_depth}")]
    SubWorkflowTooDeep { max_depth: usize },

    /// A `workflowRef` re-entered a workflow already on the call stack.
    #[error("sub-workflow cycle detected at '{reference}'")]
    SubWorkflowCycle { reference: String },

    /// A required dependency did not reach a non-failing terminal state.
    #[error("upstream step '{upstream}' did not succeed")]
    UpstreamFailed { upstream: String },

    /// A step's control-flow/config did not match its declared step kind.
    #[error("invalid step config for '{step_id}': {reason}")]
    InvalidStepConfig { step_id: String, reason: String },

    /// Catch-all for conditions not covered by a named variant.
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Stable machine-readable name of the variant, used by `StepResult`
    /// and the event notifier so callers can match on error kind without
    /// parsing the display string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputValidationError(_) => "InputValidationError",
            Self::GraphCyclic(_) => "GraphCyclic",
            Self::TemplateMissingBinding { .. } => "TemplateMissingBinding",
            Self::TemplateMalformed(_) => "TemplateMalformed",
            Self::ConditionTypeError(_) => "ConditionTypeError",
            Self::SwitchNoMatch { .. } => "SwitchNoMatch",
            Self::ForEachItemsNotArray { .. } => "ForEachItemsNotArray",
            Self::TaskNotFound { .. } => "TaskNotFound",
            Self::InputSchemaViolation { .. } => "InputSchemaViolation",
            Self::OutputSchemaViolation { .. } => "OutputSchemaViolation",
            Self::ResponseParseError { .. } => "ResponseParseError",
            Self::HttpError { .. } => "HttpError",
            Self::TransportError(_) => "TransportError",
            Self::Timeout { .. } => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::SubWorkflowTooDeep { .. } => "SubWorkflowTooDeep",
            Self::SubWorkflowCycle { .. } => "SubWorkflowCycle",
            Self::UpstreamFailed { .. } => "UpstreamFailed",
            Self::InvalidStepConfig { .. } => "InvalidStepConfig",
            Self::Other(_) => "Other",
        }
    }

    /// Whether retrying this error is ever sensible (network or 5xx).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportError(_) => true,
            Self::HttpError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(format!("json error: {err}"))
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Other(format!("yaml error: {err}"))
    }
}
