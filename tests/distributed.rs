// tests/distributed.rs

mod common;
use crate::common::builders::{JobBuilder, fast_config, independent};
use crate::common::fake_work::sleep;
use crate::common::{init_tracing, status, task, with_timeout};

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use taskdag::config::EngineConfig;
use taskdag::distributed::WorkerStats;
use taskdag::engine::{Engine, JobHandle};
use taskdag::model::{JobState, TaskErrorKind, TaskId, TaskSpec, TaskStatus, Work, work_fn};
use taskdag::types::{AssignmentMode, ExecutionMode};

/// First attempt hangs (ignoring cancellation), later attempts succeed.
fn hangs_once() -> impl Work {
    let calls = Arc::new(AtomicU32::new(0));
    work_fn(move |_ctx| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n == 1 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(json!(n))
        }
    })
}

async fn worker_holding(engine: &Engine, task: &str) -> String {
    let id = TaskId::from(task);
    with_timeout(async {
        loop {
            for w in engine.workers().await {
                if w.assigned_task_id.as_ref() == Some(&id) {
                    return w.id;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

fn spawn_run(handle: &JobHandle) -> tokio::task::JoinHandle<taskdag::errors::Result<taskdag::BatchResult>> {
    let handle = handle.clone();
    tokio::spawn(async move { handle.run().await })
}

#[tokio::test]
async fn distributed_job_runs_on_workers() {
    init_tracing();
    let engine = Engine::new(fast_config()).unwrap();
    assert_eq!(
        engine.get_worker_stats().await,
        WorkerStats {
            total_workers: 3,
            busy: 0,
            idle: 3,
            unreachable: 0
        }
    );

    let result = with_timeout(engine.execute_distributed(independent("dist", 6)))
        .await
        .unwrap();

    assert!(result.is_successful());
    assert_eq!(result.strategy, "distributed");
    for t in &result.task_results {
        let worker = t.worker_id.as_deref().expect("worker recorded");
        assert!(worker.starts_with("worker-"), "unexpected worker id {worker}");
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn push_assignment_spreads_across_workers() {
    let cfg = EngineConfig {
        assignment: AssignmentMode::Push,
        ..fast_config()
    };
    let engine = Engine::new(cfg).unwrap();
    let mut builder = JobBuilder::new("push").mode(ExecutionMode::Distributed);
    for i in 0..6 {
        builder = builder.task(&format!("t{i}"), &[], sleep(Duration::from_millis(20)));
    }

    let result = with_timeout(engine.execute(builder.build())).await.unwrap();
    assert!(result.is_successful());
    let workers: HashSet<&str> = result
        .task_results
        .iter()
        .filter_map(|t| t.worker_id.as_deref())
        .collect();
    assert!(workers.len() >= 2, "all tasks ran on {workers:?}");
    engine.shutdown().await;
}

#[tokio::test]
async fn lost_worker_task_is_reassigned_without_retry() {
    init_tracing();
    let engine = Engine::new(fast_config()).unwrap();
    let job = JobBuilder::new("reassign")
        .mode(ExecutionMode::Distributed)
        .task("slow", &[], hangs_once())
        .build();
    let handle = engine.submit(job).unwrap();
    let runner = spawn_run(&handle);

    let victim = worker_holding(&engine, "slow").await;
    assert!(engine.kill_worker(&victim).await);

    let result = with_timeout(runner).await.unwrap().unwrap();
    let slow = task(&result, "slow");
    assert_eq!(slow.status, TaskStatus::Completed);
    assert_eq!(slow.retry_count, 0);
    assert_eq!(slow.reassignments, 1);
    assert_eq!(slow.attempts, 2);
    assert_ne!(slow.worker_id.as_deref(), Some(victim.as_str()));
    assert_eq!(engine.get_worker_stats().await.unreachable, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn reassignment_ceiling_fails_the_task() {
    let cfg = EngineConfig {
        max_reassignments: 0,
        ..fast_config()
    };
    let engine = Engine::new(cfg).unwrap();
    let job = JobBuilder::new("ceiling")
        .mode(ExecutionMode::Distributed)
        .task("slow", &[], hangs_once())
        .ok_task("after", &["slow"])
        .build();
    let handle = engine.submit(job).unwrap();
    let runner = spawn_run(&handle);

    let victim = worker_holding(&engine, "slow").await;
    engine.kill_worker(&victim).await;

    let result = with_timeout(runner).await.unwrap().unwrap();
    assert_eq!(status(&result, "slow"), TaskStatus::Failed);
    assert_eq!(
        task(&result, "slow").error.as_ref().unwrap().kind,
        TaskErrorKind::WorkerUnreachable
    );
    assert_eq!(status(&result, "after"), TaskStatus::Skipped);
    engine.shutdown().await;
}

#[tokio::test]
async fn losing_every_worker_halts_the_job() {
    let cfg = EngineConfig {
        worker_count: Some(1),
        ..fast_config()
    };
    let engine = Engine::new(cfg).unwrap();
    let job = JobBuilder::new("orphaned")
        .mode(ExecutionMode::Distributed)
        .task("slow", &[], hangs_once())
        .build();
    let handle = engine.submit(job).unwrap();
    let runner = spawn_run(&handle);

    let victim = worker_holding(&engine, "slow").await;
    engine.kill_worker(&victim).await;

    let result = with_timeout(runner).await.unwrap().unwrap();
    assert_eq!(result.state, JobState::Failed);
    assert_eq!(result.execution_errors, ["no reachable workers remain"]);
    assert_eq!(status(&result, "slow"), TaskStatus::Cancelled);
    assert_eq!(
        engine.get_worker_stats().await,
        WorkerStats {
            total_workers: 1,
            busy: 0,
            idle: 0,
            unreachable: 1
        }
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn distributed_retries_count_against_the_task() {
    let engine = Engine::new(fast_config()).unwrap();
    let job = JobBuilder::new("retry")
        .mode(ExecutionMode::Distributed)
        .spec(
            TaskSpec::new("t", work_fn(|_ctx| async {
                Err(taskdag::model::TaskError::execution("always"))
            }))
            .with_max_retries(1),
        )
        .build();

    let result = with_timeout(engine.execute(job)).await.unwrap();
    let t = task(&result, "t");
    assert_eq!(t.status, TaskStatus::Failed);
    assert_eq!(t.attempts, 2);
    assert_eq!(t.retry_count, 1);
    assert_eq!(t.reassignments, 0);
    engine.shutdown().await;
}
