// src/report/mod.rs

//! Results, aggregation and progress reporting.
//!
//! - [`result`] holds the per-job [`BatchResult`] and per-task records.
//! - [`summary`] merges batch results and renders reports.
//! - [`progress`] defines progress events and listener plumbing.

pub mod progress;
pub mod result;
pub mod summary;

pub use progress::{
    ChannelListener, CollectingListener, ProgressEvent, ProgressListener, ProgressRegistry,
    ProgressState, TracingListener,
};
pub use result::{BatchResult, TaskResult};
pub use summary::{CategoryBreakdown, Summary, aggregate_results, generate_report, success_rate};
