// src/distributed/mod.rs

//! Simulated distributed execution.
//!
//! - [`registry`] tracks worker liveness and held assignments.
//! - [`queue`] is the shared pull queue.
//! - [`records`] defines the JSON assignment and result records.
//! - [`pool`] runs worker, heartbeat and monitor tasks.

pub mod pool;
pub mod queue;
pub mod records;
pub mod registry;

pub(crate) use pool::DistributedBackend;
pub use pool::{DistributedPool, PoolConfig};
pub use queue::TaskQueue;
pub use records::{TaskAssignment, TaskResultRecord};
pub use registry::{WorkerRegistry, WorkerStats, WorkerStatus, WorkerView};
