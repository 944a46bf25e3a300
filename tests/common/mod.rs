#![allow(dead_code, unused_imports)]

pub use taskdag_test_utils::builders;
pub use taskdag_test_utils::fake_work;
pub use taskdag_test_utils::{init_tracing, with_timeout};

use taskdag::model::TaskStatus;
use taskdag::report::{BatchResult, TaskResult};

/// Look up a task record by name, panicking with the available names.
pub fn task<'a>(result: &'a BatchResult, name: &str) -> &'a TaskResult {
    result
        .task_results
        .iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| {
            let names: Vec<&str> = result.task_results.iter().map(|t| t.name.as_str()).collect();
            panic!("no task {name} in result; have {names:?}")
        })
}

pub fn status(result: &BatchResult, name: &str) -> TaskStatus {
    task(result, name).status
}

/// Terminal counts must always add up to the number of tasks.
pub fn assert_counts_consistent(result: &BatchResult) {
    assert_eq!(
        result.completed_tasks + result.failed_tasks + result.skipped_tasks + result.cancelled_tasks,
        result.total_tasks,
        "terminal counts do not add up: {result:?}"
    );
}
