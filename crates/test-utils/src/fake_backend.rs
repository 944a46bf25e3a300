use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskdag::errors::Result;
use taskdag::exec::{Dispatch, EventSender, ExecEvent, ExecutorBackend};
use taskdag::model::WorkResult;

/// A fake backend that:
/// - records the task names of every cohort it was handed
/// - immediately reports each member as started and finished with the
///   scripted outcome (success unless a failure was scripted for it).
pub struct FakeBackend {
    capacity: usize,
    cohorts: Arc<Mutex<Vec<Vec<String>>>>,
    failures: Vec<String>,
}

impl FakeBackend {
    pub fn new(capacity: usize, cohorts: Arc<Mutex<Vec<Vec<String>>>>) -> Self {
        Self {
            capacity,
            cohorts,
            failures: Vec::new(),
        }
    }

    /// Every attempt of `task` fails.
    pub fn failing(mut self, task: &str) -> Self {
        self.failures.push(task.to_string());
        self
    }

    fn outcome(&self, d: &Dispatch) -> WorkResult {
        if self.failures.iter().any(|f| f == &d.name) {
            Err(taskdag::model::TaskError::execution("scripted backend failure"))
        } else {
            Ok(serde_json::json!("fake"))
        }
    }
}

impl ExecutorBackend for FakeBackend {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn dispatch(
        &mut self,
        cohort: Vec<Dispatch>,
        events: EventSender,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        {
            let mut guard = self.cohorts.lock().unwrap();
            guard.push(cohort.iter().map(|d| d.name.clone()).collect());
        }

        for d in &cohort {
            let _ = events.send(ExecEvent::Started {
                index: d.index,
                lease: d.lease,
                worker_id: None,
            });
            let _ = events.send(ExecEvent::Finished {
                index: d.index,
                lease: d.lease,
                outcome: self.outcome(d),
                elapsed: Duration::ZERO,
            });
        }
        let _ = events.send(ExecEvent::SlotFreed);

        Box::pin(async { Ok(()) })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
