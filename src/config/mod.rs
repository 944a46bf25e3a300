// src/config/mod.rs

//! Engine configuration and the TOML job file.
//!
//! - [`engine`] holds [`EngineConfig`] and its raw TOML form.
//! - [`model`] maps the job file (`[engine]`, `[job]`, `[[task]]`).
//! - [`loader`] reads files; [`validate`] turns raw forms into checked ones.

pub mod duration;
pub mod engine;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use engine::{AdaptiveThresholds, EngineConfig, RawEngineConfig};
pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{JobFile, JobSection, RawJobFile, TaskEntry};
