// src/model/work.rs

//! The work contract a task executes.
//!
//! The engine never looks inside a [`Work`]; it only calls
//! [`Work::execute`] once per attempt and records what comes back.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::task::{TaskError, TaskId, WorkResult};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-attempt context handed to the work.
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub task_id: TaskId,
    pub task_name: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Set when the attempt runs on a distributed worker.
    pub worker_id: Option<String>,
    cancel: CancellationToken,
}

impl WorkContext {
    pub fn new(
        task_id: TaskId,
        task_name: impl Into<String>,
        attempt: u32,
        worker_id: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            task_name: task_name.into(),
            attempt,
            worker_id,
            cancel,
        }
    }

    /// True once the job was cancelled or the attempt timed out.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Anything a task can run.
///
/// Implementations should honour [`WorkContext::cancelled`] where they can;
/// the engine never assumes they do.
pub trait Work: Send + Sync {
    fn execute(&self, ctx: WorkContext) -> BoxFuture<'_, WorkResult>;
}

impl<W: Work + ?Sized> Work for Arc<W> {
    fn execute(&self, ctx: WorkContext) -> BoxFuture<'_, WorkResult> {
        (**self).execute(ctx)
    }
}

/// Async closure adapter, see [`work_fn`].
pub struct FnWork<F>(F);

impl<F, Fut> Work for FnWork<F>
where
    F: Fn(WorkContext) -> Fut + Send + Sync,
    Fut: Future<Output = WorkResult> + Send + 'static,
{
    fn execute(&self, ctx: WorkContext) -> BoxFuture<'_, WorkResult> {
        Box::pin((self.0)(ctx))
    }
}

/// Wrap an async closure as [`Work`].
pub fn work_fn<F, Fut>(f: F) -> FnWork<F>
where
    F: Fn(WorkContext) -> Fut + Send + Sync,
    Fut: Future<Output = WorkResult> + Send + 'static,
{
    FnWork(f)
}

/// Blocking closure adapter, see [`blocking_fn`].
pub struct BlockingWork<F>(Arc<F>);

impl<F> Work for BlockingWork<F>
where
    F: Fn(WorkContext) -> WorkResult + Send + Sync + 'static,
{
    fn execute(&self, ctx: WorkContext) -> BoxFuture<'_, WorkResult> {
        let f = Arc::clone(&self.0);
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || f(ctx)).await {
                Ok(result) => result,
                Err(err) if err.is_panic() => {
                    Err(TaskError::panicked("blocking work panicked"))
                }
                Err(_) => Err(TaskError::cancelled()),
            }
        })
    }
}

/// Wrap a synchronous closure as [`Work`], running it on the blocking pool.
///
/// A timeout cannot interrupt blocking work; the closure should check
/// [`WorkContext::is_cancelled`] if it runs for long.
pub fn blocking_fn<F>(f: F) -> BlockingWork<F>
where
    F: Fn(WorkContext) -> WorkResult + Send + Sync + 'static,
{
    BlockingWork(Arc::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> WorkContext {
        WorkContext::new(TaskId::from("t"), "t", 1, None, CancellationToken::new())
    }

    #[tokio::test]
    async fn closure_work_sees_attempt_number() {
        let work = work_fn(|ctx: WorkContext| async move { Ok(json!(ctx.attempt)) });
        assert_eq!(work.execute(ctx()).await, Ok(json!(1)));
    }

    #[tokio::test]
    async fn blocking_panic_becomes_task_error() {
        let work = blocking_fn(|_ctx| -> WorkResult { panic!("boom") });
        let err = work.execute(ctx()).await.unwrap_err();
        assert_eq!(err.kind, crate::model::TaskErrorKind::Panicked);
    }
}
