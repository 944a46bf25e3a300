// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - strategy resolution (sequential, parallel, batched, distributed)
//! - the per-job state machine that applies dependency, retry and failure
//!   rules
//! - the driver loop that reacts to:
//!   - attempts starting and finishing
//!   - retry timers
//!   - lost workers
//!   - cancellation and job timeouts
//! - the bounded cross-job queue
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. [`Engine`] and [`JobHandle`] are the public
//! surface.

pub mod core;
pub mod handle;
pub mod queue;
pub mod runtime;
pub mod strategy;

pub use self::core::{CoreSettings, HaltReason, JobCore};
pub use handle::{Engine, JobHandle};
pub use queue::JobQueue;
pub use strategy::Strategy;
