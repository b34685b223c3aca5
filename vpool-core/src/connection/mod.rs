//! External storage pool manager abstraction.
//!
//! The hypervisor's management session is reached through a
//! [`StorageConnection`]. Models fetch a fresh [`PoolManager`] from it on
//! every call and never cache it, so a reconnect on the manager side is
//! picked up transparently.
//!
//! - [`PoolManager`]: pool enumeration, lookup and definition
//! - [`PoolHandle`]: operations on one named pool
//! - [`MemoryConnection`]: in-process manager used by tests and local runs

use crate::descriptor::PoolDefinition;
use crate::error::VpoolError;
use crate::types::PoolState;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;

pub use memory::{ManagerOp, MemoryConnection};

/// Error classes reported by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerErrorCode {
    /// No pool with the requested name
    NoStoragePool,
    /// Operation not valid in the pool's current state
    OperationInvalid,
    /// Operation attempted and failed
    OperationFailed,
    /// Session to the manager is unavailable
    NoConnection,
}

/// Error raised by the external manager. `message` is passed on verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ManagerError {
    pub code: ManagerErrorCode,
    pub message: String,
}

impl ManagerError {
    pub fn new(code: ManagerErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn no_pool(name: &str) -> Self {
        Self::new(
            ManagerErrorCode::NoStoragePool,
            format!("Storage pool not found: no storage pool with matching name '{}'", name),
        )
    }

    pub fn is_no_pool(&self) -> bool {
        self.code == ManagerErrorCode::NoStoragePool
    }
}

/// Manager faults surface to callers as `OperationFailed`.
impl From<ManagerError> for VpoolError {
    fn from(err: ManagerError) -> Self {
        VpoolError::OperationFailed { message: err.message }
    }
}

pub type ManagerResult<T> = std::result::Result<T, ManagerError>;

/// Capacity counters and state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolInfo {
    pub state: PoolState,
    /// Bytes
    pub capacity: u64,
    /// Bytes
    pub allocated: u64,
    /// Bytes
    pub available: u64,
}

/// Source of live manager sessions.
#[async_trait]
pub trait StorageConnection: Send + Sync {
    /// Fetch the current manager session.
    async fn get(&self) -> ManagerResult<Arc<dyn PoolManager>>;
}

/// Pool-level operations of the manager.
#[async_trait]
pub trait PoolManager: Send + Sync {
    /// Names of running pools.
    async fn list_active(&self) -> ManagerResult<Vec<String>>;

    /// Names of persistently defined pools that are not running.
    async fn list_defined(&self) -> ManagerResult<Vec<String>>;

    /// Handle for a pool. Fails with [`ManagerErrorCode::NoStoragePool`]
    /// when no pool has that name.
    async fn lookup(&self, name: &str) -> ManagerResult<Box<dyn PoolHandle>>;

    /// Persistently define an inactive pool.
    async fn define(&self, definition: &PoolDefinition) -> ManagerResult<Box<dyn PoolHandle>>;

    /// Create and start a pool that is not persisted.
    async fn create_transient(
        &self,
        definition: &PoolDefinition,
    ) -> ManagerResult<Box<dyn PoolHandle>>;
}

/// Operations on one pool.
#[async_trait]
pub trait PoolHandle: Send + Sync {
    fn name(&self) -> &str;

    async fn info(&self) -> ManagerResult<PoolInfo>;

    async fn is_active(&self) -> ManagerResult<bool>;

    async fn is_persistent(&self) -> ManagerResult<bool>;

    async fn autostart(&self) -> ManagerResult<bool>;

    async fn set_autostart(&self, enabled: bool) -> ManagerResult<()>;

    /// Descriptor the pool was defined with.
    async fn definition(&self) -> ManagerResult<PoolDefinition>;

    /// Descriptor rendered as manager XML.
    async fn xml_desc(&self) -> ManagerResult<String> {
        Ok(self.definition().await?.to_xml())
    }

    /// Prepare the backing storage (create the directory, format the VG, ...).
    async fn build(&self) -> ManagerResult<()>;

    /// Start the pool.
    async fn create(&self) -> ManagerResult<()>;

    /// Stop the pool. Transient pools disappear.
    async fn destroy(&self) -> ManagerResult<()>;

    /// Remove the persistent definition.
    async fn undefine(&self) -> ManagerResult<()>;

    /// Rescan the pool's volumes.
    async fn refresh(&self) -> ManagerResult<()>;

    async fn num_volumes(&self) -> ManagerResult<u32>;
}
