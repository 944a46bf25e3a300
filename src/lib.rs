// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod distributed;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod model;
pub mod report;
pub mod resources;
pub mod retry;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{JobFile, default_config_path, load_and_validate};
use crate::dag::DagGraph;
use crate::engine::{Engine, JobHandle};
use crate::report::{TracingListener, generate_report};

pub use crate::engine::Strategy;
pub use crate::errors::{Result as TaskdagResult, TaskdagError};
pub use crate::model::{Job, JobPriority, Task, TaskError, TaskId, TaskSpec, TaskStatus, work_fn};
pub use crate::report::BatchResult;
pub use crate::types::{ExecutionMode, FailurePolicy};

/// High-level entry point used by `main.rs`.
///
/// Loads the job file, builds an [`Engine`], runs the job and prints the
/// report to stdout. Returns whether the batch was successful.
pub async fn run(args: CliArgs) -> Result<bool> {
    let config_path = args
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let file = load_and_validate(&config_path)
        .with_context(|| format!("loading job file {}", config_path.display()))?;

    let mut job = file.build_job()?;
    if let Some(mode) = args.mode {
        job.execution_mode = Some(mode);
    }
    let plan = DagGraph::from_tasks(job.tasks()).execution_plan(job.tasks());

    let engine = Engine::new(file.engine.clone())?;
    engine.add_listener(Arc::new(TracingListener));
    let handle = engine.submit(job)?;

    if args.dry_run {
        print_dry_run(&file, &handle, &plan);
        return Ok(true);
    }

    // Ctrl-C → cancel the job; running tasks are signalled.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("interrupt received; cancelling job");
            handle.cancel();
        });
    }

    let result = handle.run().await?;
    engine.shutdown().await;
    info!(
        job = %result.job_id,
        state = %result.state,
        completed = result.completed_tasks,
        failed = result.failed_tasks,
        "job finished"
    );

    let report = generate_report(std::slice::from_ref(&result), args.report)?;
    println!("{report}");
    Ok(result.is_successful())
}

fn print_dry_run(file: &JobFile, handle: &JobHandle, plan: &str) {
    println!("taskdag dry-run");
    println!("  job = {} ({:?})", handle.name(), handle.priority());
    println!("  tasks = {}", handle.task_count());
    println!("  strategy = {}", handle.strategy());
    println!("  failure_policy = {:?}", file.engine.failure_policy());
    let alloc = file.engine.resource_allocation();
    println!(
        "  resources = {} workers, queue {}, batch {}, {} MB",
        alloc.max_workers, alloc.queue_size, alloc.batch_size, alloc.max_memory_mb
    );
    println!();

    println!("tasks ({}):", file.tasks.len());
    for task in &file.tasks {
        println!("  - {}", task.name);
        println!("      cmd: {}", task.cmd);
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        if let Some(retries) = task.max_retries {
            println!("      max_retries: {retries}");
        }
        if let Some(ref timeout) = task.timeout {
            println!("      timeout: {timeout}");
        }
        if let Some(ref tag) = task.tag {
            println!("      tag: {tag}");
        }
    }
    println!();

    println!("execution plan:");
    println!("{plan}");

    debug!("dry-run complete (no execution)");
}
