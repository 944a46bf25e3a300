// tests/job_file.rs

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use taskdag::config::load_and_validate;
use taskdag::errors::TaskdagError;
use taskdag::model::{JobPriority, TaskId};
use taskdag::types::{AssignmentMode, ExecutionMode, FailurePolicy};

fn job_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn loads_engine_job_and_tasks_in_file_order() {
    let file = job_file(
        r#"
[engine]
execution_mode = "parallel"
retry_delay = "250ms"
default_task_timeout = "30s"
fail_fast = true
worker_count = 2
assignment = "push"

[job]
name = "release"
priority = "high"

[[task]]
name = "build"
cmd = "cargo build"
tag = "compile"

[[task]]
name = "test"
cmd = "cargo test"
after = ["build"]
max_retries = 2
timeout = "2m"

[[task]]
name = "lint"
cmd = "cargo clippy"
priority = 5
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.engine.execution_mode, ExecutionMode::Parallel);
    assert_eq!(cfg.engine.retry_delay, Duration::from_millis(250));
    assert_eq!(cfg.engine.default_task_timeout, Some(Duration::from_secs(30)));
    assert_eq!(cfg.engine.failure_policy(), FailurePolicy::FailFast);
    assert_eq!(cfg.engine.worker_count, Some(2));
    assert_eq!(cfg.engine.assignment, AssignmentMode::Push);

    let job = cfg.build_job().unwrap();
    assert_eq!(job.name, "release");
    assert_eq!(job.priority, JobPriority::High);
    let names: Vec<&str> = job.tasks().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["build", "test", "lint"]);

    let test = job.task(&TaskId::from("test")).unwrap();
    assert_eq!(test.max_retries, 2);
    assert_eq!(test.timeout, Some(Duration::from_secs(120)));
    assert_eq!(job.task(&TaskId::from("build")).unwrap().tag.as_deref(), Some("compile"));
    assert_eq!(job.task(&TaskId::from("lint")).unwrap().priority, 5);
}

#[test]
fn dependency_cycle_is_rejected() {
    let file = job_file(
        r#"
[[task]]
name = "A"
cmd = "echo A"
after = ["B"]

[[task]]
name = "B"
cmd = "echo B"
after = ["A"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(TaskdagError::DependencyCycle(members)) => {
            assert!(members.contains(&TaskId::from("A")));
            assert!(members.contains(&TaskId::from("B")));
        }
        other => panic!("expected DependencyCycle, got {other:?}"),
    }
}

#[test]
fn unknown_dependency_is_rejected() {
    let file = job_file(
        r#"
[[task]]
name = "A"
cmd = "echo A"
after = ["ghost"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(TaskdagError::UnknownDependency { task, dependency }) => {
            assert_eq!(task, TaskId::from("A"));
            assert_eq!(dependency, TaskId::from("ghost"));
        }
        other => panic!("expected UnknownDependency, got {other:?}"),
    }
}

#[test]
fn duplicate_task_is_rejected() {
    let file = job_file(
        r#"
[[task]]
name = "A"
cmd = "echo 1"

[[task]]
name = "A"
cmd = "echo 2"
"#,
    );

    assert!(matches!(
        load_and_validate(file.path()),
        Err(TaskdagError::DuplicateTask(id)) if id == TaskId::from("A")
    ));
}

#[test]
fn empty_job_and_bad_options_are_config_errors() {
    let empty = job_file("[job]\nname = \"nothing\"\n");
    assert!(matches!(
        load_and_validate(empty.path()),
        Err(TaskdagError::ConfigError(_))
    ));

    let conflicting = job_file(
        r#"
[engine]
fail_fast = true
continue_on_failure = true

[[task]]
name = "A"
cmd = "echo A"
"#,
    );
    assert!(matches!(
        load_and_validate(conflicting.path()),
        Err(TaskdagError::ConfigError(msg)) if msg.contains("mutually exclusive")
    ));

    let bad_duration = job_file(
        r#"
[engine]
retry_delay = "soon"

[[task]]
name = "A"
cmd = "echo A"
"#,
    );
    assert!(matches!(
        load_and_validate(bad_duration.path()),
        Err(TaskdagError::ConfigError(_))
    ));
}

#[test]
fn unknown_keys_fail_to_parse() {
    let file = job_file(
        r#"
[[task]]
name = "A"
cmd = "echo A"
watch = ["src/**"]
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(TaskdagError::TomlError(_))
    ));
}

#[cfg(unix)]
mod cli_run {
    use super::*;

    use taskdag::cli::CliArgs;
    use taskdag::types::ReportFormat;

    fn args(path: &std::path::Path, dry_run: bool) -> CliArgs {
        CliArgs {
            config: Some(path.display().to_string()),
            mode: None,
            report: ReportFormat::Json,
            log_level: None,
            dry_run,
        }
    }

    #[tokio::test]
    async fn successful_job_reports_success() {
        let file = job_file(
            r#"
[[task]]
name = "hello"
cmd = "echo hello"

[[task]]
name = "world"
cmd = "echo world"
after = ["hello"]
"#,
        );
        assert!(taskdag::run(args(file.path(), false)).await.unwrap());
    }

    #[tokio::test]
    async fn failing_command_reports_failure() {
        let file = job_file(
            r#"
[[task]]
name = "broken"
cmd = "exit 3"
"#,
        );
        assert!(!taskdag::run(args(file.path(), false)).await.unwrap());
    }

    #[tokio::test]
    async fn dry_run_executes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let file = job_file(&format!(
            "[[task]]\nname = \"touch\"\ncmd = \"touch {}\"\n",
            marker.display()
        ));

        assert!(taskdag::run(args(file.path(), true)).await.unwrap());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = taskdag::run(args(&dir.path().join("absent.toml"), false))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("absent.toml"));
    }
}
