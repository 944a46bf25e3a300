#![allow(dead_code)]

//! Scripted work for engine tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use taskdag::model::{TaskError, Work, work_fn};

pub fn always_ok() -> impl Work {
    work_fn(|ctx| async move { Ok(json!({ "task": ctx.task_name })) })
}

pub fn always_fail(message: &'static str) -> impl Work {
    work_fn(move |_ctx| async move { Err(TaskError::execution(message)) })
}

/// Fails the first `failures` attempts, then succeeds. The counter holds the
/// number of attempts made so far.
pub fn fail_times(failures: u32) -> (impl Work, Arc<AtomicU32>) {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let work = work_fn(move |_ctx| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n <= failures {
                Err(TaskError::execution(format!("scripted failure {n}")))
            } else {
                Ok(json!(n))
            }
        }
    });
    (work, attempts)
}

/// Sleeps for `duration`, stopping early when cancelled.
pub fn sleep(duration: Duration) -> impl Work {
    work_fn(move |ctx| async move {
        tokio::select! {
            _ = ctx.cancelled() => Err(TaskError::cancelled()),
            _ = tokio::time::sleep(duration) => Ok(json!(null)),
        }
    })
}

/// Sleeps for `duration` and ignores cancellation.
pub fn stubborn_sleep(duration: Duration) -> impl Work {
    work_fn(move |_ctx| async move {
        tokio::time::sleep(duration).await;
        Ok(json!("finished anyway"))
    })
}

/// One entry per start or end of an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Start(String),
    End(String),
}

/// Shared log of attempt starts and ends across many tasks.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    events: Arc<Mutex<Vec<RunEvent>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Work that logs its start, waits `delay`, logs its end and succeeds.
    pub fn record(&self, delay: Duration) -> impl Work + use<> {
        let events = Arc::clone(&self.events);
        work_fn(move |ctx| {
            let events = Arc::clone(&events);
            async move {
                let name = ctx.task_name.clone();
                events.lock().unwrap().push(RunEvent::Start(name.clone()));
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                events.lock().unwrap().push(RunEvent::End(name));
                Ok(json!(null))
            }
        })
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Task names in the order they started.
    pub fn start_order(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::Start(name) => Some(name),
                RunEvent::End(_) => None,
            })
            .collect()
    }

    pub fn position(&self, event: &RunEvent) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}
