//! Core domain types for vpool.

pub mod pool;
pub mod task;

// Re-exports
pub use pool::{
    CreateOutcome, PoolCreateRequest, PoolSource, PoolSpec, PoolState, PoolType, PoolUpdate,
    SourceRequest, SourceSpec, StoragePool, Violation, ISO_POOL_NAME,
};
pub use task::{Task, TaskStatus};
