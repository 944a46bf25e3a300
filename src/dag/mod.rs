// src/dag/mod.rs

//! Dependency graph and readiness tracking.
//!
//! - [`graph`] holds the immutable task graph: adjacency, cycle detection
//!   and topological staging.
//! - [`resolver`] tracks unsatisfied dependencies at runtime and exposes the
//!   ready frontier.

pub mod graph;
pub mod resolver;

pub use graph::DagGraph;
pub use resolver::DependencyResolver;
