// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Task Executor: dispatches one `WorkflowTask` invocation (spec §4.5).
//!
//! HTTP tasks resolve `method`/`url`/`headers`/`body` against the step's
//! already-resolved input, go through the retry/backoff executor from
//! [`crate::retry`], and are bounded by a per-attempt timeout. Transform
//! tasks apply a JSONPath-like extraction and never retry. Both paths
//! validate their output against the task's declared output schema before
//! returning.

use crate::context::ContextSnapshot;
use crate::error::{OrchestratorError, Result};
use crate::model::{TaskDefinition, TaskType};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::schema;
use crate::template;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Optional side-effect hook that scores a failed HTTP response for
/// observability (SPEC_FULL.md §4.5 supplement). Scoring never influences
/// retry/error decisions — it is attached to the step result for a caller
/// to act on later.
#[async_trait]
pub trait ErrorQualityAnalyzer: Send + Sync {
    async fn score(&self, status: u16, body: &Value) -> f64;
}

/// Outcome of one task dispatch, ready to be folded into a `StepResult`.
#[derive(Debug, Clone)]
pub struct TaskExecutionOutcome {
    pub output: std::result::Result<Value, OrchestratorError>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub http_status: Option<u16>,
    pub resolved_url: Option<String>,
    pub quality_score: Option<f64>,
}

/// Dispatches `WorkflowTask` invocations. One instance is shared across a
/// whole run (and typically across runs): it owns the `reqwest::Client`
/// connection pool.
pub struct TaskExecutor {
    http_client: reqwest::Client,
    error_quality: Option<Arc<dyn ErrorQualityAnalyzer>>,
}

impl TaskExecutor {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            error_quality: None,
        }
    }

    pub fn with_error_quality_analyzer(mut self, analyzer: Arc<dyn ErrorQualityAnalyzer>) -> Self {
        self.error_quality = Some(analyzer);
        self
    }

    /// Executes `task` with `resolved_input` (the step's already
    /// template-resolved `input` map). Never panics; every failure mode is
    /// folded into `TaskExecutionOutcome::output`.
    pub async fn execute(&self, task: &TaskDefinition, resolved_input: Value) -> TaskExecutionOutcome {
        let started_at = Utc::now();
        let scope = ContextSnapshot::for_task_input(resolved_input);

        let dispatch_result = match task.task_type {
            TaskType::Http => self.execute_http(task, &scope).await,
            TaskType::Transform => self.execute_transform(task, &scope).await,
        };

        let (output, attempts, http_status, resolved_url, quality_score) = match dispatch_result {
            Ok((value, attempts, http_status, resolved_url)) => {
                (self.validate_output(task, value), attempts, http_status, resolved_url, None)
            }
            Err(DispatchFailure { error, attempts, http_status, resolved_url, body }) => {
                let quality_score = match (&self.error_quality, http_status, &body) {
                    (Some(analyzer), Some(status), Some(body)) => Some(analyzer.score(status, body).await),
                    _ => None,
                };
                (Err(error), attempts, http_status, resolved_url, quality_score)
            }
        };

        TaskExecutionOutcome {
            output,
            attempts,
            started_at,
            completed_at: Utc::now(),
            http_status,
            resolved_url,
            quality_score,
        }
    }

    fn validate_output(&self, task: &TaskDefinition, value: Value) -> std::result::Result<Value, OrchestratorError> {
        let result = schema::validate(&task.output_schema, &value);
        if result.is_valid() {
            Ok(value)
        } else {
            let details = result
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.field_path, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            Err(OrchestratorError::OutputSchemaViolation {
                step_id: task.name.clone(),
                details,
            })
        }
    }

    async fn execute_http(
        &self,
        task: &TaskDefinition,
        scope: &ContextSnapshot,
    ) -> std::result::Result<(Value, u32, Option<u16>, Option<String>), DispatchFailure> {
        let spec = task.http.as_ref().ok_or_else(|| DispatchFailure::config(task, "http task has no 'http' spec"))?;

        let method = template::resolve_string(&spec.method, scope)
            .map_err(|e| DispatchFailure::bare(e))?;
        let method = value_as_plain_string(&method);
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| DispatchFailure::bare(OrchestratorError::InvalidStepConfig {
                step_id: task.name.clone(),
                reason: format!("invalid HTTP method '{method}': {e}"),
            }))?;

        let url = template::resolve_string(&spec.url, scope).map_err(|e| DispatchFailure::bare(e))?;
        let url = value_as_plain_string(&url);

        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value_template) in &spec.headers {
            let resolved = template::resolve_string(value_template, scope).map_err(|e| DispatchFailure::bare(e))?;
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| DispatchFailure::bare(OrchestratorError::InvalidStepConfig {
                    step_id: task.name.clone(),
                    reason: format!("invalid header name '{key}': {e}"),
                }))?;
            let header_value = reqwest::header::HeaderValue::from_str(&value_as_plain_string(&resolved))
                .map_err(|e| DispatchFailure::bare(OrchestratorError::InvalidStepConfig {
                    step_id: task.name.clone(),
                    reason: format!("invalid header value for '{key}': {e}"),
                }))?;
            headers.insert(name, header_value);
        }

        let body = match &spec.body {
            Some(body) => Some(template::resolve_value(body, scope).map_err(|e| DispatchFailure::bare(e))?),
            None => None,
        };

        let policy = RetryPolicy::from(task.effective_retry());
        let executor = RetryExecutor::new(policy);
        let timeout = task.effective_timeout();

        let attempt = || async {
            let mut request = self.http_client.request(method.clone(), url.as_str()).headers(headers.clone());
            if let Some(body) = &body {
                request = request.json(body);
            }
            let send = async {
                let response = request.send().await.map_err(|e| OrchestratorError::TransportError(e.to_string()))?;
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                Ok::<(u16, String), OrchestratorError>((status, text))
            };
            match tokio::time::timeout(timeout, send).await {
                Err(_) => Err(OrchestratorError::Timeout { duration: timeout }),
                Ok(Err(e)) => Err(e),
                Ok(Ok((status, text))) if status >= 200 && status < 300 => {
                    let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
                    Ok(parsed)
                }
                Ok(Ok((status, text))) => Err(OrchestratorError::HttpError { status, body: text }),
            }
        };

        let mut attempts_made = 0u32;
        let result = executor
            .execute_counted(&mut || {
                attempts_made += 1;
                attempt()
            })
            .await;

        match result {
            Ok((value, attempts)) => Ok((value, attempts, Some(200), Some(url))),
            Err(error) => {
                let http_status = if let OrchestratorError::HttpError { status, .. } = &error {
                    Some(*status)
                } else {
                    None
                };
                let body = if let OrchestratorError::HttpError { body, .. } = &error {
                    serde_json::from_str(body).ok().or_else(|| Some(Value::String(body.clone())))
                } else {
                    None
                };
                Err(DispatchFailure {
                    error,
                    attempts: attempts_made,
                    http_status,
                    resolved_url: Some(url),
                    body,
                })
            }
        }
    }

    async fn execute_transform(
        &self,
        task: &TaskDefinition,
        scope: &ContextSnapshot,
    ) -> std::result::Result<(Value, u32, Option<u16>, Option<String>), DispatchFailure> {
        let spec = task
            .transform
            .as_ref()
            .ok_or_else(|| DispatchFailure::config(task, "transform task has no 'transform' spec"))?;

        let document = template::resolve_value(&spec.input, scope).map_err(|e| DispatchFailure::bare(e))?;
        let extracted = json_path_extract(&document, &spec.json_path).map_err(|e| {
            DispatchFailure::bare(OrchestratorError::ResponseParseError {
                step_id: task.name.clone(),
                details: e,
            })
        })?;
        Ok((extracted, 1, None, None))
    }
}

/// Internal carrier for a failed dispatch: enough context for the caller
/// to build the step result without re-deriving it from the bare error.
struct DispatchFailure {
    error: OrchestratorError,
    attempts: u32,
    http_status: Option<u16>,
    resolved_url: Option<String>,
    body: Option<Value>,
}

impl DispatchFailure {
    fn bare(error: OrchestratorError) -> Self {
        Self {
            error,
            attempts: 1,
            http_status: None,
            resolved_url: None,
            body: None,
        }
    }

    fn config(task: &TaskDefinition, reason: &str) -> Self {
        Self::bare(OrchestratorError::InvalidStepConfig {
            step_id: task.name.clone(),
            reason: reason.to_string(),
        })
    }
}

/// A resolved template scalar, flattened to the plain string a
/// `reqwest::Method`/URL/header needs (numbers and booleans print bare,
/// per the embedding rule in `template::embed_as_string`).
fn value_as_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Minimal JSONPath-like extraction (`$`, `$.a.b[0]`) over an already
/// template-resolved document, reusing the template path grammar for the
/// segment syntax (SPEC_FULL.md §10: transform tasks share the dotted/
/// subscript grammar rather than a full JSONPath implementation).
fn json_path_extract(document: &Value, json_path: &str) -> std::result::Result<Value, String> {
    let trimmed = json_path.trim();
    let rest = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    if rest.is_empty() {
        return Ok(document.clone());
    }
    let segments = template::parse_path(rest).map_err(|e| e.to_string())?;
    let mut current = document;
    for segment in &segments {
        current = match segment {
            template::PathSegment::Key(key) => current
                .get(key)
                .ok_or_else(|| format!("no field '{key}' at this point in jsonPath '{json_path}'"))?,
            template::PathSegment::Index(idx) => current
                .get(idx)
                .ok_or_else(|| format!("no index [{idx}] at this point in jsonPath '{json_path}'"))?,
        };
    }
    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpTaskSpec, TransformTaskSpec};
    use std::collections::HashMap;

    fn http_task(url: String) -> TaskDefinition {
        TaskDefinition {
            name: "fetch".into(),
            namespace: "default".into(),
            task_type: TaskType::Http,
            input_schema: serde_json::json!({}),
            output_schema: serde_json::json!({}),
            http: Some(HttpTaskSpec {
                method: "GET".into(),
                url,
                headers: HashMap::new(),
                body: None,
            }),
            transform: None,
            categories: vec![],
            tags: vec![],
            timeout: Some(Duration::from_secs(2)),
            retry: Some(crate::model::RetryConfig { max_attempts: 2, backoff_ms: 1 }),
        }
    }

    #[tokio::test]
    async fn http_success_returns_parsed_json() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/users/7")
            .with_status(200)
            .with_body(r#"{"id": 7, "name": "Ada"}"#)
            .create_async()
            .await;

        let task = http_task(format!("{}/users/{{{{ input.userId }}}}", server.url()));
        let executor = TaskExecutor::new(reqwest::Client::new());
        let outcome = executor.execute(&task, serde_json::json!({"userId": 7})).await;

        let output = outcome.output.expect("expected success");
        assert_eq!(output["name"], Value::String("Ada".into()));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.http_status, Some(200));
    }

    #[tokio::test]
    async fn http_4xx_does_not_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/7")
            .with_status(404)
            .with_body("not found")
            .expect(1)
            .create_async()
            .await;

        let task = http_task(format!("{}/users/{{{{ input.userId }}}}", server.url()));
        let executor = TaskExecutor::new(reqwest::Client::new());
        let outcome = executor.execute(&task, serde_json::json!({"userId": 7})).await;

        assert!(outcome.output.is_err());
        assert_eq!(outcome.http_status, Some(404));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_5xx_retries_up_to_max_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let task = http_task(format!("{}/flaky", server.url()));
        let executor = TaskExecutor::new(reqwest::Client::new());
        let outcome = executor.execute(&task, serde_json::json!({})).await;

        assert!(outcome.output.is_err());
        assert_eq!(outcome.attempts, 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn transform_extracts_via_json_path() {
        let task = TaskDefinition {
            name: "extract".into(),
            namespace: "default".into(),
            task_type: TaskType::Transform,
            input_schema: serde_json::json!({}),
            output_schema: serde_json::json!({}),
            http: None,
            transform: Some(TransformTaskSpec {
                input: serde_json::json!({"orders": [{"id": "{{ input.orderId }}"}]}),
                json_path: "$.orders[0].id".into(),
            }),
            categories: vec![],
            tags: vec![],
            timeout: None,
            retry: None,
        };
        let executor = TaskExecutor::new(reqwest::Client::new());
        let outcome = executor.execute(&task, serde_json::json!({"orderId": 42})).await;
        assert_eq!(outcome.output.unwrap(), Value::from(42));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn output_schema_violation_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/users/7")
            .with_status(200)
            .with_body(r#"{"id": 7}"#)
            .create_async()
            .await;

        let mut task = http_task(format!("{}/users/7", server.url()));
        task.output_schema = serde_json::json!({"type": "object", "required": ["name"]});
        let executor = TaskExecutor::new(reqwest::Client::new());
        let outcome = executor.execute(&task, serde_json::json!({})).await;

        let err = outcome.output.unwrap_err();
        assert_eq!(err.kind(), "OutputSchemaViolation");
    }
}
