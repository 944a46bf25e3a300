// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{JobFile, RawJobFile};
use crate::errors::Result;

/// Read a job file and deserialize it without semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawJobFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawJobFile> {
    let file: RawJobFile = toml::from_str(contents)?;
    Ok(file)
}

/// Read, deserialize and validate a job file.
///
/// Validation covers the `[engine]` options, empty jobs, unknown `after`
/// references, duplicate task names and dependency cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<JobFile> {
    let raw = load_from_path(&path)?;
    JobFile::try_from(raw)
}

/// `TASKDAG_CONFIG` if set, otherwise `taskdag.toml` in the working directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("TASKDAG_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("taskdag.toml"))
}
