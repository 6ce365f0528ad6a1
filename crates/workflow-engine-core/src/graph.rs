// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Graph Builder: turns a workflow's steps into a dependency DAG, detects
//! cycles, and computes topological levels (spec §4.3).
//!
//! Built on `petgraph::graph::DiGraph`, the same graph dependency the
//! upstream workspace already declared for this purpose. Cycle detection
//! uses `petgraph::algo::kosaraju_scc` rather than a hand-rolled
//! gray/black DFS: any strongly connected component with more than one
//! node, or a self-loop edge, is a cycle.

use crate::error::{OrchestratorError, Result};
use crate::model::{Step, WorkflowDefinition};
use crate::template::extract_task_refs;
use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// The built DAG: topological levels plus the edge set that produced them.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// `levels[L]` holds the step ids at topological level `L`, in
    /// declaration order.
    pub levels: Vec<Vec<String>>,
    /// `(dependency, dependent)` pairs, explicit and implicit combined.
    pub edges: Vec<(String, String)>,
    level_of: HashMap<String, usize>,
}

impl WorkflowGraph {
    pub fn level_of(&self, step_id: &str) -> Option<usize> {
        self.level_of.get(step_id).copied()
    }

    /// Builds the graph for `workflow`. Returns `GraphCyclic` if any
    /// dependency cycle is found; no levels are produced in that case.
    pub fn build(workflow: &WorkflowDefinition) -> Result<Self> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut node_of: HashMap<String, NodeIndex> = HashMap::new();
        let mut declaration_order: HashMap<String, usize> = HashMap::new();

        for (i, step) in workflow.tasks.iter().enumerate() {
            let idx = graph.add_node(step.id.clone());
            node_of.insert(step.id.clone(), idx);
            declaration_order.insert(step.id.clone(), i);
        }

        let mut edge_set: HashSet<(String, String)> = HashSet::new();
        let mut edges: Vec<(String, String)> = Vec::new();

        let mut add_edge = |from: &str, to: &str, edge_set: &mut HashSet<(String, String)>, edges: &mut Vec<(String, String)>| {
            if from == to {
                return; // recorded as a self-loop cycle below, not a scheduling edge
            }
            if !node_of.contains_key(from) {
                return; // dangling reference; surfaced as TaskNotFound at dispatch time
            }
            let key = (from.to_string(), to.to_string());
            if edge_set.insert(key.clone()) {
                edges.push(key);
            }
        };

        for step in &workflow.tasks {
            for dep in &step.depends_on {
                add_edge(dep, &step.id, &mut edge_set, &mut edges);
            }
            for implicit_dep in implicit_dependencies(step) {
                add_edge(&implicit_dep, &step.id, &mut edge_set, &mut edges);
            }
        }

        // Self-loops: a step depending on itself, explicit or implicit.
        let mut self_loops: Vec<String> = Vec::new();
        for step in &workflow.tasks {
            let mut refs: Vec<String> = step.depends_on.clone();
            refs.extend(implicit_dependencies(step));
            if refs.iter().any(|r| r == &step.id) {
                self_loops.push(step.id.clone());
            }
        }

        for (from, to) in &edges {
            graph.add_edge(node_of[from], node_of[to], ());
        }

        let sccs = kosaraju_scc(&graph);
        let mut cycles: Vec<Vec<String>> = Vec::new();
        for scc in &sccs {
            if scc.len() > 1 {
                cycles.push(scc.iter().map(|idx| graph[*idx].clone()).collect());
            }
        }
        cycles.extend(self_loops.into_iter().map(|id| vec![id]));

        if !cycles.is_empty() {
            let description = cycles
                .iter()
                .map(|c| format!("[{}]", c.join(" -> ")))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(OrchestratorError::GraphCyclic(description));
        }

        let levels = compute_levels(&workflow.tasks, &edges, &declaration_order);
        let mut level_of = HashMap::new();
        for (l, ids) in levels.iter().enumerate() {
            for id in ids {
                level_of.insert(id.clone(), l);
            }
        }

        Ok(Self {
            levels,
            edges,
            level_of,
        })
    }
}

/// Scans a step's templated fields (input, condition, switch, forEach) for
/// `tasks.<id>.output` references, per spec §4.3's implicit-edge rule.
fn implicit_dependencies(step: &Step) -> Vec<String> {
    let mut refs = Vec::new();
    for value in step.input.values() {
        scan_value(value, &mut refs);
    }
    if let Some(condition) = &step.condition {
        refs.extend(extract_task_refs(condition));
    }
    if let Some(switch) = &step.switch {
        refs.extend(extract_task_refs(&switch.value));
        for case in &switch.cases {
            if let Some(s) = case.match_value.as_str() {
                refs.extend(extract_task_refs(s));
            }
        }
    }
    if let Some(for_each) = &step.for_each {
        refs.extend(extract_task_refs(&for_each.items));
    }
    refs.sort();
    refs.dedup();
    refs
}

fn scan_value(value: &serde_json::Value, refs: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => refs.extend(extract_task_refs(s)),
        serde_json::Value::Array(items) => {
            for item in items {
                scan_value(item, refs);
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                scan_value(v, refs);
            }
        }
        _ => {}
    }
}

/// Kahn's algorithm over the declared edge set; ties within a round are
/// broken by declaration order for deterministic scheduling.
fn compute_levels(
    steps: &[Step],
    edges: &[(String, String)],
    declaration_order: &HashMap<String, usize>,
) -> Vec<Vec<String>> {
    let mut in_degree: HashMap<String, usize> = steps.iter().map(|s| (s.id.clone(), 0)).collect();
    let mut dependents: HashMap<String, Vec<String>> = steps.iter().map(|s| (s.id.clone(), Vec::new())).collect();
    for (from, to) in edges {
        *in_degree.entry(to.clone()).or_insert(0) += 1;
        dependents.entry(from.clone()).or_default().push(to.clone());
    }

    let mut remaining = in_degree.clone();
    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut placed: HashSet<String> = HashSet::new();

    loop {
        let mut frontier: Vec<String> = remaining
            .iter()
            .filter(|(id, deg)| **deg == 0 && !placed.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        if frontier.is_empty() {
            break;
        }
        frontier.sort_by_key(|id| declaration_order.get(id).copied().unwrap_or(usize::MAX));

        for id in &frontier {
            placed.insert(id.clone());
            remaining.remove(id);
        }
        for id in &frontier {
            if let Some(deps) = dependents.get(id) {
                for dependent in deps {
                    if let Some(deg) = remaining.get_mut(dependent) {
                        *deg = deg.saturating_sub(1);
                    }
                }
            }
        }
        levels.push(frontier);
    }

    levels
}
