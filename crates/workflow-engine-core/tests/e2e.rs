// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios driving the whole [`Orchestrator`] against a
//! [`mockito`]-stubbed network, one per testable property/scenario.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use workflow_engine_core::catalog::InMemoryCatalog;
use workflow_engine_core::executor::TaskExecutor;
use workflow_engine_core::model::{
    ForEachSpec, HttpTaskSpec, InputFieldSpec, RetryConfig, Step, SwitchCase, SwitchDefault, SwitchSpec,
    TaskDefinition, TaskType, WorkflowDefinition,
};
use workflow_engine_core::notifier::NoopNotifier;
use workflow_engine_core::record::{RunStatus, SkipReason, StepStatus};
use workflow_engine_core::Orchestrator;

fn http_task(name: &str, url: String) -> TaskDefinition {
    TaskDefinition {
        name: name.to_string(),
        namespace: "default".into(),
        task_type: TaskType::Http,
        input_schema: json!({}),
        output_schema: json!({}),
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
        retry: Some(RetryConfig { max_attempts: 2, backoff_ms: 1 }),
    }
}

fn step(id: &str, task_ref: &str, depends_on: &[&str]) -> Step {
    Step {
        id: id.to_string(),
        task_ref: Some(task_ref.to_string()),
        workflow_ref: None,
        input: HashMap::new(),
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        condition: None,
        switch: None,
        for_each: None,
        timeout: None,
        retry: None,
        continue_on_failure: false,
    }
}

fn bare_workflow(tasks: Vec<Step>) -> WorkflowDefinition {
    WorkflowDefinition {
        name: "wf".into(),
        namespace: "default".into(),
        input_schema: HashMap::new(),
        output_mapping: HashMap::new(),
        tasks,
        triggers: vec![],
    }
}

fn orchestrator(catalog: InMemoryCatalog) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        Arc::new(catalog),
        Arc::new(TaskExecutor::new(reqwest::Client::new())),
        Arc::new(NoopNotifier),
    ))
}

#[tokio::test]
async fn sequential_happy_path() {
    let mut server = mockito::Server::new_async().await;
    let _a = server.mock("GET", "/a").with_status(200).with_body(r#"{"v": 1}"#).create_async().await;
    let _b = server.mock("GET", "/b").with_status(200).with_body(r#"{"v": 2}"#).create_async().await;
    let _c = server.mock("GET", "/c").with_status(200).with_body(r#"{"v": 3}"#).create_async().await;

    let catalog = InMemoryCatalog::new()
        .with_task(http_task("a", format!("{}/a", server.url())))
        .with_task(http_task("b", format!("{}/b", server.url())))
        .with_task(http_task("c", format!("{}/c", server.url())));
    let orch = orchestrator(catalog);

    let workflow = bare_workflow(vec![step("a", "a", &[]), step("b", "b", &["a"]), step("c", "c", &["b"])]);
    let record = orch.run(&workflow, json!({})).await.unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.step_results.len(), 3);
    assert!(record.step_results.iter().all(|r| r.status == StepStatus::Succeeded));
}

#[tokio::test]
async fn diamond_parallelism_shares_a_level() {
    let mut server = mockito::Server::new_async().await;
    let _root = server.mock("GET", "/root").with_status(200).with_body("{}").create_async().await;
    let _l = server.mock("GET", "/l").with_status(200).with_body("{}").create_async().await;
    let _r = server.mock("GET", "/r").with_status(200).with_body("{}").create_async().await;
    let _join = server.mock("GET", "/join").with_status(200).with_body("{}").create_async().await;

    let catalog = InMemoryCatalog::new()
        .with_task(http_task("root", format!("{}/root", server.url())))
        .with_task(http_task("left", format!("{}/l", server.url())))
        .with_task(http_task("right", format!("{}/r", server.url())))
        .with_task(http_task("join", format!("{}/join", server.url())));
    let orch = orchestrator(catalog);

    let workflow = bare_workflow(vec![
        step("root", "root", &[]),
        step("left", "left", &["root"]),
        step("right", "right", &["root"]),
        step("join", "join", &["left", "right"]),
    ]);
    let record = orch.run(&workflow, json!({})).await.unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.step_results.len(), 4);
}

#[tokio::test]
async fn cycle_is_rejected_before_dispatch() {
    let orch = orchestrator(InMemoryCatalog::new());
    let mut a = step("a", "noop", &["b"]);
    let b = step("b", "noop", &["a"]);
    a.depends_on = vec!["b".to_string()];
    let workflow = bare_workflow(vec![a, b]);

    let err = orch.run(&workflow, json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "GraphCyclic");
}

#[tokio::test]
async fn conditional_skip_cascades_downstream() {
    let mut server = mockito::Server::new_async().await;
    let _a = server.mock("GET", "/a").with_status(200).with_body(r#"{"v": 1}"#).create_async().await;

    let catalog = InMemoryCatalog::new().with_task(http_task("a", format!("{}/a", server.url())));
    let orch = orchestrator(catalog);

    let mut gated = step("gated", "a", &["a"]);
    gated.condition = Some("false".into());
    let mut downstream = step("downstream", "a", &["gated"]);
    downstream.condition = None;

    let workflow = bare_workflow(vec![step("a", "a", &[]), gated, downstream]);
    let record = orch.run(&workflow, json!({})).await.unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    let gated_result = record.step_results.iter().find(|r| r.step_id == "gated").unwrap();
    assert_eq!(gated_result.status, StepStatus::Skipped);
    assert_eq!(gated_result.skip_reason, Some(SkipReason::ConditionFalse));

    // A step downstream of a condition-false skip is NOT itself skipped:
    // only `UpstreamFailed` propagates (SPEC_FULL.md §10 decision 5).
    let downstream_result = record.step_results.iter().find(|r| r.step_id == "downstream").unwrap();
    assert_eq!(downstream_result.status, StepStatus::Succeeded);
}

#[tokio::test]
async fn switch_routes_to_the_matching_case() {
    let mut server = mockito::Server::new_async().await;
    let _premium = server.mock("GET", "/premium").with_status(200).with_body(r#"{"tier": "premium"}"#).create_async().await;
    let basic = server.mock("GET", "/basic").with_status(200).with_body(r#"{"tier": "basic"}"#).expect(0).create_async().await;

    let catalog = InMemoryCatalog::new()
        .with_task(http_task("premium", format!("{}/premium", server.url())))
        .with_task(http_task("basic", format!("{}/basic", server.url())));
    let orch = orchestrator(catalog);

    let mut routed = step("routed", "premium", &[]);
    routed.task_ref = None;
    routed.switch = Some(SwitchSpec {
        value: "premium".to_string(),
        cases: vec![
            SwitchCase { match_value: json!("premium"), task_ref: "premium".into() },
            SwitchCase { match_value: json!("basic"), task_ref: "basic".into() },
        ],
        default: Some(SwitchDefault { task_ref: "basic".into() }),
    });

    let workflow = bare_workflow(vec![routed]);
    let record = orch.run(&workflow, json!({})).await.unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    let routed_result = record.step_results.iter().find(|r| r.step_id == "routed").unwrap();
    assert_eq!(routed_result.effective_task_ref.as_deref(), Some("premium"));
    basic.assert_async().await;
}

#[tokio::test]
async fn for_each_partial_failure_still_yields_other_results() {
    let mut server = mockito::Server::new_async().await;
    let _ok1 = server.mock("GET", "/item/1").with_status(200).with_body(r#"{"v": 1}"#).create_async().await;
    let _bad = server.mock("GET", "/item/2").with_status(500).expect(2).create_async().await;
    let _ok3 = server.mock("GET", "/item/3").with_status(200).with_body(r#"{"v": 3}"#).create_async().await;

    let mut task = http_task("fetch-item", format!("{}/item/{{{{ forEach.item }}}}", server.url()));
    task.retry = Some(RetryConfig { max_attempts: 2, backoff_ms: 1 });
    let catalog = InMemoryCatalog::new().with_task(task);
    let orch = orchestrator(catalog);

    let mut fan_out = step("fan-out", "fetch-item", &[]);
    fan_out.for_each = Some(ForEachSpec {
        items: "{{ input.items }}".to_string(),
        item_var: "item".to_string(),
        max_parallel: Some(3),
    });

    let workflow = bare_workflow(vec![fan_out]);
    let record = orch.run(&workflow, json!({"items": [1, 2, 3]})).await.unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    let result = record.step_results.iter().find(|r| r.step_id == "fan-out").unwrap();
    assert_eq!(result.status, StepStatus::Failed);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn sub_workflow_cycle_is_rejected() {
    let mut outer_step = step("call-self", "noop", &[]);
    outer_step.task_ref = None;
    outer_step.workflow_ref = Some("wf".to_string());
    let outer = bare_workflow(vec![outer_step]);

    let catalog = InMemoryCatalog::new().with_workflow(outer.clone());
    let orch = orchestrator(catalog);

    let record = orch.run(&outer, json!({})).await.unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    let step_result = record.step_results.iter().find(|r| r.step_id == "call-self").unwrap();
    assert_eq!(step_result.status, StepStatus::Failed);
}

#[tokio::test]
async fn missing_required_input_fails_before_any_dispatch() {
    let orch = orchestrator(InMemoryCatalog::new());
    let mut input_schema = HashMap::new();
    input_schema.insert(
        "userId".to_string(),
        InputFieldSpec { field_type: "integer".into(), required: true, default: None, description: Some("the user id".into()) },
    );
    let mut workflow = bare_workflow(vec![]);
    workflow.input_schema = input_schema;

    let err = orch.run(&workflow, json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "InputValidationError");
}
