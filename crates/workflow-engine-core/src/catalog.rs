// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Catalog: the read-only interface the orchestrator consumes to resolve
//! `taskRef`/`workflowRef`. Discovering the catalog's contents (a K8s CRD
//! watcher, a filesystem loader) is explicitly out of scope for this crate
//! (spec §1) — only the trait and a simple in-memory implementation live
//! here.

use crate::model::{CatalogKey, TaskDefinition, WorkflowDefinition};
use std::collections::HashMap;

/// Read-only view over the set of task and workflow definitions visible to
/// an orchestrator run. The catalog is immutable for the lifetime of a run
/// (spec §5, "the task/workflow catalog is read-only during a run").
pub trait Catalog: Send + Sync {
    fn get_task(&self, key: &CatalogKey) -> Option<TaskDefinition>;
    fn get_workflow(&self, key: &CatalogKey) -> Option<WorkflowDefinition>;
}

/// A catalog backed by two in-memory maps, suitable for tests and for the
/// demo CLI's filesystem loader.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    tasks: HashMap<CatalogKey, TaskDefinition>,
    workflows: HashMap<CatalogKey, WorkflowDefinition>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.insert(task.key(), task);
        self
    }

    pub fn with_workflow(mut self, workflow: WorkflowDefinition) -> Self {
        self.workflows.insert(workflow.key(), workflow);
        self
    }
}

impl Catalog for InMemoryCatalog {
    fn get_task(&self, key: &CatalogKey) -> Option<TaskDefinition> {
        self.tasks.get(key).cloned()
    }

    fn get_workflow(&self, key: &CatalogKey) -> Option<WorkflowDefinition> {
        self.workflows.get(key).cloned()
    }
}
