// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Demo runner for the workflow execution engine: loads a directory of
//! `WorkflowTask`/`Workflow` YAML resources and either validates a
//! workflow's shape or executes it end to end, printing progress as it
//! goes. Not the gateway service — a thin harness for exercising the
//! orchestrator locally.

mod catalog_loader;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use workflow_engine_core::graph::WorkflowGraph;
use workflow_engine_core::model::CatalogKey;
use workflow_engine_core::notifier::TracingNotifier;
use workflow_engine_core::record::{RunStatus, StepStatus};
use workflow_engine_core::schema;
use workflow_engine_core::{Catalog, Orchestrator, TaskExecutor};

#[derive(Parser)]
#[command(name = "workflow-engine", version, about = "Run and validate Workflow resources against a WorkflowTask catalog")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Builds the dependency graph and validates a workflow's shape without
    /// dispatching any tasks.
    Validate {
        /// Directory of WorkflowTask/Workflow YAML files.
        #[arg(long, default_value = "catalog")]
        catalog_dir: PathBuf,
        /// Workflow reference, `namespace/name` or bare `name`.
        workflow: String,
    },
    /// Runs a workflow to completion against its catalog.
    Run {
        #[arg(long, default_value = "catalog")]
        catalog_dir: PathBuf,
        workflow: String,
        /// Path to a JSON file supplying the workflow input; omit for `{}`.
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("workflow_engine=info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate { catalog_dir, workflow } => validate(&catalog_dir, &workflow),
        Command::Run { catalog_dir, workflow, input } => run(&catalog_dir, &workflow, input.as_deref()).await,
    }
}

fn validate(catalog_dir: &std::path::Path, workflow_arg: &str) -> Result<()> {
    let catalog = catalog_loader::load_catalog_dir(catalog_dir)?;
    let (namespace, name) = catalog_loader::parse_workflow_arg(workflow_arg)?;
    let key = CatalogKey::new(namespace, name);
    let workflow = catalog
        .get_workflow(&key)
        .with_context(|| format!("workflow '{key}' not found in catalog"))?;

    match WorkflowGraph::build(&workflow) {
        Ok(graph) => {
            println!("{} '{}' has {} step(s) across {} level(s)", "valid".green().bold(), workflow.name, workflow.tasks.len(), graph.levels.len());
            for (i, level) in graph.levels.iter().enumerate() {
                println!("  level {i}: {}", level.join(", "));
            }
        }
        Err(e) => {
            println!("{} {}", "invalid:".red().bold(), e);
            std::process::exit(1);
        }
    }

    let (result, _, suggested_prompt) = schema::validate_workflow_input(&workflow.input_schema, &serde_json::json!({}));
    if !result.is_valid() {
        if let Some(prompt) = suggested_prompt {
            println!("{} {}", "note:".yellow(), prompt);
        }
    }

    Ok(())
}

async fn run(catalog_dir: &std::path::Path, workflow_arg: &str, input_path: Option<&std::path::Path>) -> Result<()> {
    let catalog = catalog_loader::load_catalog_dir(catalog_dir)?;
    let (namespace, name) = catalog_loader::parse_workflow_arg(workflow_arg)?;
    let key = CatalogKey::new(namespace, name);
    let workflow = catalog
        .get_workflow(&key)
        .with_context(|| format!("workflow '{key}' not found in catalog"))?;

    let input = match input_path {
        Some(path) => {
            let contents = std::fs::read_to_string(path).with_context(|| format!("reading input file '{}'", path.display()))?;
            serde_json::from_str(&contents).with_context(|| format!("parsing input file '{}' as JSON", path.display()))?
        }
        None => serde_json::json!({}),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(catalog),
        Arc::new(TaskExecutor::new(reqwest::Client::new())),
        Arc::new(TracingNotifier),
    ));

    let record = orchestrator.run(&workflow, input).await?;

    println!();
    match record.status {
        RunStatus::Succeeded => println!("{} workflow '{}' completed in {}ms", "ok".green().bold(), workflow.name, record.duration_ms()),
        RunStatus::Failed => println!("{} workflow '{}' failed after {}ms", "failed".red().bold(), workflow.name, record.duration_ms()),
        RunStatus::Cancelled => println!("{} workflow '{}' cancelled after {}ms", "cancelled".yellow().bold(), workflow.name, record.duration_ms()),
        RunStatus::Running => println!("{} workflow '{}' still running", "?".yellow().bold(), workflow.name),
    }

    for step in &record.step_results {
        let label = match step.status {
            StepStatus::Succeeded => "succeeded".green(),
            StepStatus::Failed => "failed".red(),
            StepStatus::Skipped => "skipped".yellow(),
            StepStatus::Running => "running".blue(),
            StepStatus::Pending => "pending".dimmed(),
        };
        println!("  {:<20} {} ({} attempt(s), {}ms)", step.step_id, label, step.attempts, step.duration_ms());
        if let Some(err) = &step.error {
            println!("    {} {}", "error:".red(), err);
        }
    }

    if let Some(output) = &record.output {
        println!();
        println!("{}", "output:".bold());
        println!("{}", serde_json::to_string_pretty(output)?);
    }

    if record.status == RunStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
