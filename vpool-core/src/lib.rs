//! vpool core library
//!
//! Storage pool lifecycle on top of an external hypervisor manager, with
//! slow work (deep ISO scans) run as tracked background tasks.

pub mod config;
pub mod connection;
pub mod descriptor;
pub mod error;
pub mod models;
pub mod observability;
pub mod paths;
pub mod scanner;
pub mod services;
pub mod store;
pub mod tasks;
pub mod types;

// Re-export commonly used items
pub use config::Config;
pub use connection::{MemoryConnection, PoolHandle, PoolManager, StorageConnection};
pub use error::{Result, VpoolError};
pub use models::{IsoPoolModel, StoragePoolModel, StoragePoolsModel};
pub use observability::init as init_observability;
pub use scanner::{ScanJob, Scanner};
pub use services::Services;
pub use store::ObjectStore;
pub use tasks::{ProgressReporter, TaskRegistry};
pub use types::{
    CreateOutcome, PoolCreateRequest, PoolState, PoolType, PoolUpdate, StoragePool, Task,
    TaskStatus,
};
