// src/exec/local.rs

//! In-process backend running cohorts on the current Tokio runtime.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use super::backend::{Dispatch, EventSender, ExecEvent, ExecutorBackend};
use super::task_runner::run_cohort;
use crate::errors::{Result, TaskdagError};

/// Runs each cohort in its own Tokio task.
///
/// At most `slots` cohorts are in flight; the driver never exceeds
/// [`capacity`](ExecutorBackend::capacity), the semaphore only guards
/// against callers that ignore it.
pub struct LocalBackend {
    slots: usize,
    permits: Arc<Semaphore>,
}

impl LocalBackend {
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            slots,
            permits: Arc::new(Semaphore::new(slots)),
        }
    }
}

impl ExecutorBackend for LocalBackend {
    fn capacity(&self) -> usize {
        self.slots
    }

    fn dispatch(
        &mut self,
        cohort: Vec<Dispatch>,
        events: EventSender,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let permits = Arc::clone(&self.permits);

        Box::pin(async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| TaskdagError::Other(e.into()))?;

            debug!(size = cohort.len(), "dispatching cohort");
            tokio::spawn(async move {
                let _permit = permit;
                run_cohort(cohort, &events).await;
                if events.send(ExecEvent::SlotFreed).is_err() {
                    debug!("job driver finished before cohort; dropping slot release");
                }
            });
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::model::{JobId, work_fn};

    fn dispatch(index: usize) -> Dispatch {
        Dispatch {
            job_id: JobId::new(),
            index,
            lease: index as u64 + 1,
            task_id: format!("t{index}").into(),
            name: format!("t{index}"),
            attempt: 1,
            work: Arc::new(work_fn(move |_ctx| async move { Ok(json!(index)) })),
            timeout: Some(Duration::from_secs(1)),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn cohort_members_run_in_order_then_free_slot() {
        let mut backend = LocalBackend::new(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        backend
            .dispatch(vec![dispatch(0), dispatch(1)], tx)
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                ExecEvent::Started { index, .. } => seen.push(format!("start {index}")),
                ExecEvent::Finished { index, outcome, .. } => {
                    assert_eq!(outcome, Ok(json!(index)));
                    seen.push(format!("finish {index}"));
                }
                ExecEvent::SlotFreed => {
                    seen.push("freed".to_string());
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(seen, ["start 0", "finish 0", "start 1", "finish 1", "freed"]);
    }
}
