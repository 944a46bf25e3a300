// src/exec/shell.rs

//! Shell command work used by job files.

use std::process::Stdio;

use anyhow::Context;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::model::{BoxFuture, TaskError, Work, WorkContext, WorkResult};

/// How much of stderr ends up in a failure message.
const STDERR_TAIL: usize = 512;

/// Runs a command through the platform shell.
///
/// Success yields `{"exit_code": 0, "stdout": "..."}`. A non-zero exit is an
/// execution error carrying the exit code and the tail of stderr. Cancelling
/// the attempt kills the child process.
#[derive(Debug, Clone)]
pub struct ShellWork {
    cmd: String,
}

impl ShellWork {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    async fn run(&self, ctx: WorkContext) -> anyhow::Result<WorkResult> {
        info!(
            task = %ctx.task_id,
            attempt = ctx.attempt,
            cmd = %self.cmd,
            "starting task process"
        );

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", ctx.task_name))?;

        // Drain both pipes concurrently so the child never blocks on a full buffer.
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let out_reader = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(out) = stdout.as_mut() {
                let _ = out.read_to_string(&mut buf).await;
            }
            buf
        });
        let err_reader = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(err) = stderr.as_mut() {
                let _ = err.read_to_string(&mut buf).await;
            }
            buf
        });

        tokio::select! {
            status = child.wait() => {
                let status = status
                    .with_context(|| format!("waiting for process of task '{}'", ctx.task_name))?;
                let code = status.code().unwrap_or(-1);
                let stdout = out_reader.await.unwrap_or_default();
                let stderr = err_reader.await.unwrap_or_default();

                info!(
                    task = %ctx.task_id,
                    exit_code = code,
                    success = status.success(),
                    "task process exited"
                );
                if !stderr.is_empty() {
                    debug!(task = %ctx.task_id, "stderr: {}", stderr.trim_end());
                }

                if status.success() {
                    Ok(Ok(json!({ "exit_code": code, "stdout": stdout })))
                } else {
                    Ok(Err(TaskError::execution(format!(
                        "exit code {code}: {}",
                        tail(&stderr, STDERR_TAIL)
                    ))))
                }
            }

            _ = ctx.cancelled() => {
                info!(task = %ctx.task_id, "cancellation requested; killing process");
                if let Err(e) = child.kill().await {
                    warn!(task = %ctx.task_id, error = %e, "failed to kill child process");
                }
                Ok(Err(TaskError::cancelled()))
            }
        }
    }
}

impl Work for ShellWork {
    fn execute(&self, ctx: WorkContext) -> BoxFuture<'_, WorkResult> {
        Box::pin(async move {
            match self.run(ctx).await {
                Ok(outcome) => outcome,
                Err(err) => Err(TaskError::from(err)),
            }
        })
    }
}

fn tail(s: &str, max: usize) -> &str {
    let s = s.trim_end();
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use crate::model::{TaskErrorKind, TaskId};

    fn ctx(token: CancellationToken) -> WorkContext {
        WorkContext::new(TaskId::from("sh"), "sh", 1, None, token)
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let work = ShellWork::new("echo hello");
        let value = work.execute(ctx(CancellationToken::new())).await.unwrap();
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["stdout"], "hello\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_execution_error() {
        let work = ShellWork::new("echo broken >&2; exit 3");
        let err = work
            .execute(ctx(CancellationToken::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Execution);
        assert!(err.message.contains("exit code 3"));
        assert!(err.message.contains("broken"));
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let token = CancellationToken::new();
        let work = ShellWork::new("sleep 30");
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = tokio::time::timeout(Duration::from_secs(5), work.execute(ctx(token)))
            .await
            .expect("kill should be prompt")
            .unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Cancelled);
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("héllo", 4), "llo");
    }
}
