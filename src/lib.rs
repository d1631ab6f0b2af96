// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod events;
pub mod executor;
pub mod logging;
pub mod notification;
pub mod operation;
pub mod persistence;
pub mod runtime;
pub mod scheduler;
pub mod service;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{DagDefinition, DagGraph, DagSchedule};
use crate::events::dag_run_channel;
use crate::runtime::Runtime;
use crate::service::DagService;

pub use crate::runtime::RuntimeBuilder;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and dag validation
/// - in-memory persistence, services and executors
/// - one dag run, with its events printed as they arrive, or the dag's cron
///   schedule when `[schedule]` is enabled
/// - Ctrl-C handling (cancels the run, or stops the schedule)
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config from {}", args.config))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let mut runtime = Runtime::builder(cfg.operations.clone())
        .options(cfg.executor)
        .build();
    let service = Arc::clone(runtime.service());

    let dag = service.create_dag(DagDefinition::from(&cfg.dag))?;

    if let Some(schedule) = cfg.schedule.as_ref().filter(|s| s.enabled) {
        return run_scheduled(runtime, schedule).await;
    }

    let dag_run = service.create_dag_run(&dag)?;
    let run_id = dag_run.id;

    // The creation event is already out; every status and output event comes
    // from the executor, which has not started yet.
    let mut events = service.events().subscribe(&dag_run_channel(run_id));
    println!(
        "dag {}:{} run {} ({} tasks)",
        dag.token,
        dag.version,
        run_id,
        dag.tasks.len()
    );

    runtime.start();

    // Ctrl-C → cancel the run; the executor winds it down.
    {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!(dag_run_id = run_id, "Ctrl+C received; canceling dag run");
            service.cancel_dag_run(run_id);
        });
    }

    // The channel closes once the run reaches a terminal status.
    while let Some(event) = events.recv().await {
        println!("{event}");
    }

    let finished = service
        .find_dag_run(run_id)?
        .with_context(|| format!("dag run {run_id} disappeared"))?;
    print_summary(&service, &finished)?;

    runtime.shutdown().await?;

    if finished.status != dag::DagRunStatus::Success {
        bail!("dag run {run_id} finished with status {}", finished.status);
    }
    Ok(())
}

/// Store and arm the dag's schedule, then let it trigger runs until Ctrl-C.
async fn run_scheduled(mut runtime: Runtime, schedule: &DagSchedule) -> Result<()> {
    let scheduler = runtime.scheduler().clone();
    if !scheduler.update(schedule)? {
        bail!("dag {} has no schedule to update", schedule.token);
    }

    println!(
        "dag {} scheduled with cron \"{}\"; Ctrl-C to stop",
        schedule.token,
        schedule.cron_expression.as_deref().unwrap_or_default()
    );
    runtime.start();

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl+C")?;
    info!(dag = %schedule.token, "Ctrl+C received; stopping schedule");
    scheduler.stop();

    let service = Arc::clone(runtime.service());
    for dag_run in service.find_pending_dag_runs()? {
        service.cancel_dag_run(dag_run.id);
    }
    for dag_run in service.find_dag_runs()? {
        let finished = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            wait_until_finished(&service, dag_run.id),
        )
        .await
        .unwrap_or(Ok(dag_run))?;
        print_summary(&service, &finished)?;
    }

    runtime.shutdown().await?;
    Ok(())
}

async fn wait_until_finished(service: &DagService, id: types::DagRunId) -> Result<dag::DagRun> {
    loop {
        let dag_run = service
            .find_dag_run(id)?
            .with_context(|| format!("dag run {id} disappeared"))?;
        if dag_run.status.is_terminal() {
            return Ok(dag_run);
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}

fn print_summary(service: &DagService, dag_run: &dag::DagRun) -> Result<()> {
    let dag = service
        .find_dag(dag_run.dag_id)?
        .with_context(|| format!("dag {} disappeared", dag_run.dag_id))?;

    println!();
    println!("dag run {} {}", dag_run.id, dag_run.status);
    for task_run in &dag_run.task_runs {
        let token = dag
            .task(task_run.task_id)
            .map(|t| t.token.as_str())
            .unwrap_or("?");
        println!("  {token} (task run {}): {}", task_run.id, task_run.status);
    }
    Ok(())
}

/// Dry-run output: print tasks in dependency order with their settings.
fn print_dry_run(cfg: &ConfigFile) {
    let graph = DagGraph::from_dag(&cfg.dag);

    println!("taskflow dry-run");
    println!("  config.serialization = {:?}", cfg.executor.serialization);
    if let Some(delay) = cfg.executor.tick_retry {
        println!("  config.tick_retry = {delay:?}");
    }
    if let Some(schedule) = &cfg.schedule {
        println!(
            "  schedule.cron = {} (enabled: {})",
            schedule.cron_expression.as_deref().unwrap_or_default(),
            schedule.enabled
        );
    }
    println!();

    println!("dag {} ({} tasks):", cfg.dag.token, cfg.dag.tasks.len());

    // Validation already rejected cycles; fall back to declaration order
    // rather than failing a dry run.
    let order = graph
        .topological_order()
        .unwrap_or_else(|_| graph.tasks().map(str::to_string).collect());

    for token in order {
        let Some(task) = cfg.dag.task_by_token(&token) else {
            continue;
        };
        println!("  - {token}");
        println!("      operation: {}", task.operation);
        println!("      retry: {}", task.retry);
        if !task.depends.is_empty() {
            println!("      depends: {:?}", task.depends);
        }
        for (key, value) in &task.command.config {
            println!("      config.{key}: {value}");
        }
        for (key, value) in &task.command.environment {
            println!("      env.{key}: {value}");
        }
    }

    debug!("dry-run complete (no execution)");
}
