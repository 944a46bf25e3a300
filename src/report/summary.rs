// src/report/summary.rs

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::result::BatchResult;
use crate::errors::Result;
use crate::model::TaskStatus;
use crate::types::ReportFormat;

/// Tag used for tasks that carry no classification.
pub const UNTAGGED: &str = "untagged";

/// `completed / total * 100`, defined as `0.0` for an empty set.
pub fn success_rate(completed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (completed as f64 * 100.0) / total as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub success_rate: f64,
}

/// Cross-job totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_jobs: usize,
    pub successful_jobs: usize,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    pub cancelled_tasks: usize,
    pub success_rate: f64,
    pub duration_ms: u64,
    /// Present only when at least one task carries a tag.
    pub by_category: BTreeMap<String, CategoryBreakdown>,
    pub execution_errors: Vec<String>,
}

impl Summary {
    pub fn is_successful(&self) -> bool {
        self.failed_tasks == 0 && self.execution_errors.is_empty()
    }
}

/// Merge batch results into one summary.
pub fn aggregate_results(results: &[BatchResult]) -> Summary {
    let mut summary = Summary {
        total_jobs: results.len(),
        ..Default::default()
    };
    let mut any_tagged = false;

    for batch in results {
        if batch.is_successful() {
            summary.successful_jobs += 1;
        }
        summary.total_tasks += batch.total_tasks;
        summary.completed_tasks += batch.completed_tasks;
        summary.failed_tasks += batch.failed_tasks;
        summary.skipped_tasks += batch.skipped_tasks;
        summary.cancelled_tasks += batch.cancelled_tasks;
        summary.duration_ms = summary.duration_ms.saturating_add(batch.duration_ms);
        summary.execution_errors.extend(
            batch
                .execution_errors
                .iter()
                .map(|e| format!("{}: {e}", batch.job_name)),
        );

        for task in &batch.task_results {
            any_tagged |= task.tag.is_some();
            let key = task.tag.clone().unwrap_or_else(|| UNTAGGED.to_string());
            let entry = summary.by_category.entry(key).or_default();
            entry.total += 1;
            match task.status {
                TaskStatus::Completed => entry.completed += 1,
                TaskStatus::Failed => entry.failed += 1,
                TaskStatus::Skipped => entry.skipped += 1,
                TaskStatus::Cancelled => entry.cancelled += 1,
                _ => {}
            }
        }
    }

    if any_tagged {
        for entry in summary.by_category.values_mut() {
            entry.success_rate = success_rate(entry.completed, entry.total);
        }
    } else {
        summary.by_category.clear();
    }

    summary.success_rate = success_rate(summary.completed_tasks, summary.total_tasks);
    summary
}

/// Render results in the requested format. The results are not modified.
pub fn generate_report(results: &[BatchResult], format: ReportFormat) -> Result<String> {
    let summary = aggregate_results(results);
    match format {
        ReportFormat::Text => Ok(render_text(results, &summary)),
        ReportFormat::Json => {
            let doc = serde_json::json!({
                "summary": summary,
                "jobs": results,
            });
            Ok(serde_json::to_string_pretty(&doc)?)
        }
        ReportFormat::Html => Ok(render_html(results, &summary)),
    }
}

fn render_text(results: &[BatchResult], summary: &Summary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}/{} tasks completed ({:.1}%), {} failed, {} skipped, {} cancelled in {}ms",
        summary.completed_tasks,
        summary.total_tasks,
        summary.success_rate,
        summary.failed_tasks,
        summary.skipped_tasks,
        summary.cancelled_tasks,
        summary.duration_ms
    );

    for batch in results {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "job {} [{}] strategy={} duration={}ms",
            batch.job_name, batch.state, batch.strategy, batch.duration_ms
        );
        for task in &batch.task_results {
            let _ = write!(
                out,
                "  {:<10} {} ({} attempt(s), {}ms)",
                task.status.to_string(),
                task.name,
                task.attempts,
                task.duration_ms
            );
            if let Some(err) = &task.error {
                let _ = write!(out, ": {err}");
            }
            let _ = writeln!(out);
        }
        for err in &batch.execution_errors {
            let _ = writeln!(out, "  error: {err}");
        }
    }

    if !summary.by_category.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "by category:");
        for (tag, c) in &summary.by_category {
            let _ = writeln!(
                out,
                "  {tag}: {}/{} completed ({:.1}%)",
                c.completed, c.total, c.success_rate
            );
        }
    }

    out
}

fn render_html(results: &[BatchResult], summary: &Summary) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>taskdag report</title></head>\n<body>\n");
    let _ = writeln!(
        out,
        "<h1>taskdag report</h1>\n<p>{}/{} tasks completed ({:.1}%), {} failed, {} skipped, {} cancelled</p>",
        summary.completed_tasks,
        summary.total_tasks,
        summary.success_rate,
        summary.failed_tasks,
        summary.skipped_tasks,
        summary.cancelled_tasks
    );

    for batch in results {
        let _ = writeln!(
            out,
            "<h2>{} <small>{}</small></h2>\n<table>\n<tr><th>task</th><th>status</th><th>attempts</th><th>duration (ms)</th><th>error</th></tr>",
            escape_html(&batch.job_name),
            batch.state
        );
        for task in &batch.task_results {
            let error = task
                .error
                .as_ref()
                .map(|e| escape_html(&e.to_string()))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&task.name),
                task.status,
                task.attempts,
                task.duration_ms,
                error
            );
        }
        out.push_str("</table>\n");
        for err in &batch.execution_errors {
            let _ = writeln!(out, "<p class=\"error\">{}</p>", escape_html(err));
        }
    }

    out.push_str("</body>\n</html>\n");
    out
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobId, JobState, TaskId};
    use crate::report::TaskResult;

    fn task(name: &str, status: TaskStatus, tag: Option<&str>) -> TaskResult {
        TaskResult {
            task_id: TaskId::from(name),
            name: name.to_string(),
            status,
            attempts: 1,
            retry_count: 0,
            reassignments: 0,
            duration_ms: 1,
            retry_delays_ms: vec![],
            result: None,
            error: None,
            tag: tag.map(str::to_string),
            worker_id: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn batch(name: &str, tasks: Vec<TaskResult>) -> BatchResult {
        let count = |s: TaskStatus| tasks.iter().filter(|t| t.status == s).count();
        BatchResult {
            job_id: JobId::new(),
            job_name: name.to_string(),
            state: JobState::Completed,
            strategy: "parallel".into(),
            total_tasks: tasks.len(),
            completed_tasks: count(TaskStatus::Completed),
            failed_tasks: count(TaskStatus::Failed),
            skipped_tasks: count(TaskStatus::Skipped),
            cancelled_tasks: count(TaskStatus::Cancelled),
            duration_ms: 10,
            success_rate: success_rate(count(TaskStatus::Completed), tasks.len()),
            task_results: tasks,
            execution_errors: vec![],
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn success_rate_edges() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(7, 10), 70.0);
    }

    #[test]
    fn empty_input_summarises_to_zero() {
        let s = aggregate_results(&[]);
        assert_eq!(s.total_tasks, 0);
        assert_eq!(s.success_rate, 0.0);
        assert!(s.by_category.is_empty());
    }

    #[test]
    fn aggregates_across_jobs_with_categories() {
        let a = batch(
            "a",
            vec![
                task("t1", TaskStatus::Completed, Some("unit")),
                task("t2", TaskStatus::Failed, Some("unit")),
            ],
        );
        let b = batch(
            "b",
            vec![
                task("t3", TaskStatus::Completed, Some("e2e")),
                task("t4", TaskStatus::Skipped, None),
            ],
        );
        let s = aggregate_results(&[a, b]);
        assert_eq!(s.total_jobs, 2);
        assert_eq!(s.successful_jobs, 1);
        assert_eq!(s.total_tasks, 4);
        assert_eq!(s.completed_tasks, 2);
        assert_eq!(s.success_rate, 50.0);
        assert_eq!(s.by_category["unit"].success_rate, 50.0);
        assert_eq!(s.by_category["e2e"].completed, 1);
        assert_eq!(s.by_category[UNTAGGED].skipped, 1);
    }

    #[test]
    fn reports_render_every_format() {
        let results = vec![batch("<job>", vec![task("t1", TaskStatus::Completed, None)])];

        let text = generate_report(&results, ReportFormat::Text).unwrap();
        assert!(text.starts_with("1/1 tasks completed (100.0%)"));

        let json = generate_report(&results, ReportFormat::Json).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(doc["summary"]["total_tasks"], 1);
        assert_eq!(doc["jobs"][0]["job_name"], "<job>");

        let html = generate_report(&results, ReportFormat::Html).unwrap();
        assert!(html.contains("&lt;job&gt;"));
        assert!(!html.contains("<job>"));
    }
}
