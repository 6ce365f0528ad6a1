// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Data model: `WorkflowTask` and `Workflow` resources, and the steps,
//! control flow, and retry/timeout settings that compose them.
//!
//! Mirrors the YAML envelope in the external interface spec: each
//! definition carries `apiVersion`/`kind`/`metadata`/`spec` so the same
//! struct deserializes what a catalog loader reads off disk (or, outside
//! this crate's scope, off a CRD watch).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Identifies a task or workflow definition within the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogKey {
    pub namespace: String,
    pub name: String,
}

impl CatalogKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for CatalogKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// `spec.type` of a `WorkflowTask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Http,
    Transform,
}

/// HTTP method for an `http`-typed task. Templates are allowed in `url`,
/// `headers`, and `body`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTaskSpec {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

/// `transform`-typed task: a JSONPath-like extraction over a
/// template-resolved input document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformTaskSpec {
    pub input: serde_json::Value,
    #[serde(rename = "jsonPath")]
    pub json_path: String,
}

/// Retry policy for a task or step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(rename = "maxAttempts")]
    pub max_attempts: u32,
    #[serde(rename = "backoffMs")]
    pub backoff_ms: u64,
}

impl RetryConfig {
    /// No retry: exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 1000,
        }
    }

    /// Default HTTP retry policy per spec §4.5: 3 attempts, 1s base backoff.
    pub fn default_http() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }
}

/// A `WorkflowTask` resource: a typed HTTP endpoint or transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    #[serde(rename = "outputSchema")]
    pub output_schema: serde_json::Value,
    pub http: Option<HttpTaskSpec>,
    pub transform: Option<TransformTaskSpec>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Per-task timeout; defaults to 30s when absent (spec §4.5/§5).
    #[serde(default, with = "duration_seconds_opt")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl TaskDefinition {
    pub fn key(&self) -> CatalogKey {
        CatalogKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_secs(30))
    }

    pub fn effective_retry(&self) -> RetryConfig {
        self.retry.unwrap_or(match self.task_type {
            TaskType::Http => RetryConfig::default_http(),
            TaskType::Transform => RetryConfig::none(),
        })
    }
}

/// A declared workflow input field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFieldSpec {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

/// `switch.cases[*]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    #[serde(rename = "match")]
    pub match_value: serde_json::Value,
    #[serde(rename = "taskRef")]
    pub task_ref: String,
}

/// `step.switch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchSpec {
    pub value: String,
    pub cases: Vec<SwitchCase>,
    pub default: Option<SwitchDefault>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchDefault {
    #[serde(rename = "taskRef")]
    pub task_ref: String,
}

/// `step.forEach`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForEachSpec {
    pub items: String,
    #[serde(rename = "itemVar")]
    pub item_var: String,
    #[serde(rename = "maxParallel")]
    pub max_parallel: Option<usize>,
}

/// One node in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(rename = "taskRef")]
    pub task_ref: Option<String>,
    #[serde(rename = "workflowRef")]
    pub workflow_ref: Option<String>,
    #[serde(default)]
    pub input: HashMap<String, serde_json::Value>,
    #[serde(rename = "dependsOn", default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub switch: Option<SwitchSpec>,
    #[serde(rename = "forEach", default)]
    pub for_each: Option<ForEachSpec>,
    #[serde(default, with = "duration_seconds_opt")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(rename = "continueOnFailure", default)]
    pub continue_on_failure: bool,
}

impl Step {
    pub fn depends_on_set(&self) -> HashSet<String> {
        self.depends_on.iter().cloned().collect()
    }
}

/// A `Workflow` resource: a DAG of steps over a shared input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: HashMap<String, InputFieldSpec>,
    #[serde(rename = "outputMapping", default)]
    pub output_mapping: HashMap<String, String>,
    pub tasks: Vec<Step>,
    #[serde(default)]
    pub triggers: Vec<serde_json::Value>,
}

impl WorkflowDefinition {
    pub fn key(&self) -> CatalogKey {
        CatalogKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.tasks.iter().find(|s| s.id == id)
    }
}

/// `serde` helper: durations serialize/deserialize as whole seconds, but the
/// wire format spec (`30s`, `5m`, `1h`) is parsed at the YAML boundary by
/// `parse_duration_string` below before reaching these structs in practice
/// (catalog loaders call it explicitly). Kept as plain seconds here so the
/// in-memory struct itself has no dependency on the string grammar.
mod duration_seconds_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

/// Parses the wire duration grammar (`30s`, `5m`, `1h`) from spec §6.
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (number_part, unit) = s.split_at(s.len() - 1);
    let value: u64 = number_part.parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}
