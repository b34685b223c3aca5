//! Storage pool models.
//!
//! Models are the operations the REST layer exposes. They fetch a manager
//! session from the [`StorageConnection`](crate::connection::StorageConnection)
//! on every call and translate manager faults into [`VpoolError`]s.

pub mod isopool;
pub mod storagepool;
pub mod storagepools;

pub use isopool::{IsoPool, IsoPoolModel};
pub use storagepool::StoragePoolModel;
pub use storagepools::StoragePoolsModel;

use crate::connection::{ManagerError, PoolHandle, PoolManager};
use crate::error::{Result, VpoolError};
use crate::observability::metrics::record_pool_failure;
use tracing::error;

/// Handle for `name`, with a missing pool reported as `PoolNotFound`.
pub(crate) async fn get_pool(manager: &dyn PoolManager, name: &str) -> Result<Box<dyn PoolHandle>> {
    manager.lookup(name).await.map_err(|e| {
        if e.is_no_pool() {
            VpoolError::PoolNotFound { name: name.to_string() }
        } else {
            manager_failure("lookup", e)
        }
    })
}

/// Count and log a failed manager call, keeping the manager's message.
pub(crate) fn manager_failure(operation: &'static str, err: ManagerError) -> VpoolError {
    record_pool_failure(operation);
    error!(operation, code = ?err.code, "Storage manager error: {}", err.message);
    err.into()
}
