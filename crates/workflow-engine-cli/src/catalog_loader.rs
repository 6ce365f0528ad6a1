// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Filesystem catalog loader: reads a directory of `*.yaml`/`*.yml` files,
//! each holding a `WorkflowTask` or `Workflow` resource in the
//! `apiVersion`/`kind`/`metadata`/`spec` envelope, and builds an
//! in-memory [`InMemoryCatalog`].
//!
//! This is a convenience for local runs and the tests in this crate, not
//! the Kubernetes CRD watcher a production gateway would use.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use workflow_engine_core::catalog::InMemoryCatalog;
use workflow_engine_core::model::{
    parse_duration_string, ForEachSpec, HttpTaskSpec, InputFieldSpec, RetryConfig, Step, SwitchSpec, TaskDefinition,
    TaskType, TransformTaskSpec, WorkflowDefinition,
};

#[derive(Debug, Deserialize)]
struct RawMetadata {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[allow(dead_code)]
    #[serde(rename = "apiVersion", default)]
    api_version: Option<String>,
    kind: String,
    metadata: RawMetadata,
    spec: Value,
}

#[derive(Debug, Deserialize)]
struct RawTaskSpec {
    #[serde(rename = "type")]
    task_type: TaskType,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    input_schema: Value,
    #[serde(rename = "outputSchema", default = "empty_schema")]
    output_schema: Value,
    #[serde(default)]
    http: Option<HttpTaskSpec>,
    #[serde(default)]
    transform: Option<TransformTaskSpec>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    timeout: Option<String>,
    #[serde(default)]
    retry: Option<RetryConfig>,
}

fn empty_schema() -> Value {
    serde_json::json!({})
}

#[derive(Debug, Deserialize)]
struct RawWorkflowSpec {
    #[serde(rename = "inputSchema", default)]
    input_schema: HashMap<String, InputFieldSpec>,
    #[serde(rename = "outputMapping", default)]
    output_mapping: HashMap<String, String>,
    #[serde(default)]
    tasks: Vec<RawStep>,
    #[serde(default)]
    triggers: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    id: String,
    #[serde(rename = "taskRef", default)]
    task_ref: Option<String>,
    #[serde(rename = "workflowRef", default)]
    workflow_ref: Option<String>,
    #[serde(default)]
    input: HashMap<String, Value>,
    #[serde(rename = "dependsOn", default)]
    depends_on: Vec<String>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    switch: Option<SwitchSpec>,
    #[serde(rename = "forEach", default)]
    for_each: Option<ForEachSpec>,
    #[serde(default)]
    timeout: Option<String>,
    #[serde(default)]
    retry: Option<RetryConfig>,
    #[serde(rename = "continueOnFailure", default)]
    continue_on_failure: bool,
}

impl RawStep {
    fn into_step(self) -> Step {
        Step {
            id: self.id,
            task_ref: self.task_ref,
            workflow_ref: self.workflow_ref,
            input: self.input,
            depends_on: self.depends_on,
            condition: self.condition,
            switch: self.switch,
            for_each: self.for_each,
            timeout: self.timeout.as_deref().and_then(parse_duration_string),
            retry: self.retry,
            continue_on_failure: self.continue_on_failure,
        }
    }
}

const DEFAULT_NAMESPACE: &str = "default";

/// Loads every `*.yaml`/`*.yml` file directly under `dir` into one catalog.
/// Files whose `kind` is neither `WorkflowTask` nor `Workflow` are skipped
/// with a warning; a malformed file fails the whole load (fail fast, same
/// as the orchestrator's own "no partial state" stance).
pub fn load_catalog_dir(dir: &Path) -> Result<InMemoryCatalog> {
    let mut catalog = InMemoryCatalog::new();

    let entries = std::fs::read_dir(dir).with_context(|| format!("reading catalog directory '{}'", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_yaml = path.extension().and_then(|e| e.to_str()).map(|e| e == "yaml" || e == "yml").unwrap_or(false);
        if !is_yaml {
            continue;
        }

        let contents = std::fs::read_to_string(&path).with_context(|| format!("reading '{}'", path.display()))?;
        let envelope: RawEnvelope =
            serde_yaml::from_str(&contents).with_context(|| format!("parsing envelope in '{}'", path.display()))?;
        let namespace = envelope.metadata.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        match envelope.kind.as_str() {
            "WorkflowTask" => {
                let spec: RawTaskSpec = serde_json::from_value(envelope.spec)
                    .with_context(|| format!("parsing WorkflowTask spec in '{}'", path.display()))?;
                catalog = catalog.with_task(TaskDefinition {
                    name: envelope.metadata.name,
                    namespace,
                    task_type: spec.task_type,
                    input_schema: spec.input_schema,
                    output_schema: spec.output_schema,
                    http: spec.http,
                    transform: spec.transform,
                    categories: spec.categories,
                    tags: spec.tags,
                    timeout: spec.timeout.as_deref().and_then(parse_duration_string),
                    retry: spec.retry,
                });
            }
            "Workflow" => {
                let spec: RawWorkflowSpec = serde_json::from_value(envelope.spec)
                    .with_context(|| format!("parsing Workflow spec in '{}'", path.display()))?;
                catalog = catalog.with_workflow(WorkflowDefinition {
                    name: envelope.metadata.name,
                    namespace,
                    input_schema: spec.input_schema,
                    output_mapping: spec.output_mapping,
                    tasks: spec.tasks.into_iter().map(RawStep::into_step).collect(),
                    triggers: spec.triggers,
                });
            }
            other => {
                tracing::warn!(kind = other, path = %path.display(), "skipping resource of unrecognized kind");
            }
        }
    }

    Ok(catalog)
}

/// Parses `namespace/name` or a bare `name` (falling back to `default`).
pub fn parse_workflow_arg(arg: &str) -> Result<(String, String)> {
    match arg.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok((ns.to_string(), name.to_string())),
        Some(_) => bail!("invalid workflow reference '{arg}': expected 'namespace/name' or 'name'"),
        None => Ok((DEFAULT_NAMESPACE.to_string(), arg.to_string())),
    }
}
