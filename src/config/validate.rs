// src/config/validate.rs

use std::collections::HashSet;

use super::duration::parse_optional;
use super::engine::EngineConfig;
use super::model::{JobFile, RawJobFile};
use crate::errors::{Result, TaskdagError};
use crate::exec::ShellWork;
use crate::model::{Job, TaskSpec};

impl TryFrom<RawJobFile> for JobFile {
    type Error = TaskdagError;

    fn try_from(raw: RawJobFile) -> std::result::Result<Self, Self::Error> {
        let engine = EngineConfig::try_from(raw.engine.clone())?;
        validate_raw_job_file(&raw)?;
        let file = JobFile::new_unchecked(engine, raw.job, raw.task);
        // Building the job runs the same duplicate and cycle checks as the API.
        file.build_job()?.validate()?;
        Ok(file)
    }
}

fn validate_raw_job_file(file: &RawJobFile) -> Result<()> {
    ensure_has_tasks(file)?;
    validate_task_entries(file)?;
    Ok(())
}

fn ensure_has_tasks(file: &RawJobFile) -> Result<()> {
    if file.task.is_empty() {
        return Err(TaskdagError::ConfigError(
            "job file must contain at least one [[task]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_entries(file: &RawJobFile) -> Result<()> {
    let names: HashSet<&str> = file.task.iter().map(|t| t.name.as_str()).collect();

    for task in &file.task {
        if task.name.trim().is_empty() {
            return Err(TaskdagError::ConfigError(
                "every [[task]] needs a non-empty name".to_string(),
            ));
        }
        if task.cmd.trim().is_empty() {
            return Err(TaskdagError::ConfigError(format!(
                "task '{}' has an empty cmd",
                task.name
            )));
        }
        for dep in &task.after {
            if !names.contains(dep.as_str()) {
                return Err(TaskdagError::UnknownDependency {
                    task: task.name.as_str().into(),
                    dependency: dep.as_str().into(),
                });
            }
        }
        parse_optional(&format!("task '{}' timeout", task.name), task.timeout.as_deref())
            .map_err(TaskdagError::ConfigError)?;
    }
    Ok(())
}

impl JobFile {
    /// Turn the file into a [`Job`] whose tasks run their `cmd` in a shell.
    pub fn build_job(&self) -> Result<Job> {
        let mut job = Job::new(self.job.name.clone()).with_priority(self.job.priority);
        if let Some(mode) = self.job.execution_mode {
            job = job.with_mode(mode);
        }

        for entry in &self.tasks {
            let mut spec = TaskSpec::new(entry.name.clone(), ShellWork::new(entry.cmd.clone()))
                .depends_on(entry.after.iter())
                .with_priority(entry.priority);
            if let Some(retries) = entry.max_retries {
                spec = spec.with_max_retries(retries);
            }
            let timeout = parse_optional(&format!("task '{}' timeout", entry.name), entry.timeout.as_deref())
                .map_err(TaskdagError::ConfigError)?;
            if let Some(timeout) = timeout {
                spec = spec.with_timeout(timeout);
            }
            if let Some(tag) = &entry.tag {
                spec = spec.with_tag(tag.clone());
            }
            job.add_task(spec)?;
        }

        Ok(job)
    }
}
