//! In-process pool manager.
//!
//! Mirrors the manager's pool semantics closely enough for the models to be
//! exercised end to end: duplicate names are rejected, transient pools vanish
//! when destroyed, state-dependent operations are checked, and directory
//! pools are backed by real directories. Any operation can be made to fail
//! once with [`MemoryConnection::fail_next`].

use super::{
    ManagerError, ManagerErrorCode, ManagerResult, PoolHandle, PoolInfo, PoolManager,
    StorageConnection,
};
use crate::descriptor::{PoolDefinition, PoolKind};
use crate::types::PoolState;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Operations that accept an injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerOp {
    Define,
    CreateTransient,
    Build,
    Create,
    Destroy,
    Undefine,
    SetAutostart,
    Refresh,
}

#[derive(Debug, Clone)]
struct PoolRecord {
    definition: PoolDefinition,
    active: bool,
    persistent: bool,
    autostart: bool,
    capacity: u64,
    allocated: u64,
    volumes: u32,
}

impl PoolRecord {
    fn new(definition: PoolDefinition, active: bool, persistent: bool) -> Self {
        Self {
            definition,
            active,
            persistent,
            autostart: false,
            capacity: 0,
            allocated: 0,
            volumes: 0,
        }
    }
}

#[derive(Default)]
struct State {
    pools: BTreeMap<String, PoolRecord>,
    failures: HashMap<(String, ManagerOp), String>,
    offline: bool,
}

impl State {
    fn take_failure(&mut self, name: &str, op: ManagerOp) -> ManagerResult<()> {
        match self.failures.remove(&(name.to_string(), op)) {
            Some(message) => Err(ManagerError::new(ManagerErrorCode::OperationFailed, message)),
            None => Ok(()),
        }
    }

    fn record(&mut self, name: &str) -> ManagerResult<&mut PoolRecord> {
        self.pools.get_mut(name).ok_or_else(|| ManagerError::no_pool(name))
    }
}

/// In-memory [`StorageConnection`] and [`PoolManager`].
#[derive(Clone, Default)]
pub struct MemoryConnection {
    state: Arc<Mutex<State>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `op` on pool `name` fail with `message`.
    pub async fn fail_next(&self, name: &str, op: ManagerOp, message: impl Into<String>) {
        self.state.lock().await.failures.insert((name.to_string(), op), message.into());
    }

    /// Make [`StorageConnection::get`] fail until called again with `false`.
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Set the capacity counters reported for a pool.
    pub async fn set_usage(&self, name: &str, capacity: u64, allocated: u64) -> ManagerResult<()> {
        let mut state = self.state.lock().await;
        let record = state.record(name)?;
        record.capacity = capacity;
        record.allocated = allocated.min(capacity);
        Ok(())
    }

    fn handle(&self, name: &str) -> Box<dyn PoolHandle> {
        Box::new(MemoryPool { name: name.to_string(), state: self.state.clone() })
    }

    async fn insert(
        &self,
        definition: &PoolDefinition,
        op: ManagerOp,
        active: bool,
        persistent: bool,
    ) -> ManagerResult<Box<dyn PoolHandle>> {
        let name = definition.name.clone();
        let mut state = self.state.lock().await;
        state.take_failure(&name, op)?;

        if state.pools.contains_key(&name) {
            return Err(ManagerError::new(
                ManagerErrorCode::OperationFailed,
                format!("operation failed: pool '{}' already exists", name),
            ));
        }
        if active {
            check_target(definition)?;
        }

        state.pools.insert(name.clone(), PoolRecord::new(definition.clone(), active, persistent));
        debug!(pool = %name, active, persistent, "Pool added");
        drop(state);

        if active {
            // Freshly started pools report their current contents
            let handle = self.handle(&name);
            handle.refresh().await?;
            return Ok(handle);
        }
        Ok(self.handle(&name))
    }
}

#[async_trait]
impl StorageConnection for MemoryConnection {
    async fn get(&self) -> ManagerResult<Arc<dyn PoolManager>> {
        if self.state.lock().await.offline {
            return Err(ManagerError::new(
                ManagerErrorCode::NoConnection,
                "no connection to the storage manager",
            ));
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl PoolManager for MemoryConnection {
    async fn list_active(&self) -> ManagerResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state.pools.iter().filter(|(_, r)| r.active).map(|(n, _)| n.clone()).collect())
    }

    async fn list_defined(&self) -> ManagerResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .pools
            .iter()
            .filter(|(_, r)| r.persistent && !r.active)
            .map(|(n, _)| n.clone())
            .collect())
    }

    async fn lookup(&self, name: &str) -> ManagerResult<Box<dyn PoolHandle>> {
        let state = self.state.lock().await;
        if !state.pools.contains_key(name) {
            return Err(ManagerError::no_pool(name));
        }
        Ok(self.handle(name))
    }

    async fn define(&self, definition: &PoolDefinition) -> ManagerResult<Box<dyn PoolHandle>> {
        self.insert(definition, ManagerOp::Define, false, true).await
    }

    async fn create_transient(
        &self,
        definition: &PoolDefinition,
    ) -> ManagerResult<Box<dyn PoolHandle>> {
        self.insert(definition, ManagerOp::CreateTransient, true, false).await
    }
}

/// Handle resolving its pool by name on every call.
struct MemoryPool {
    name: String,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl PoolHandle for MemoryPool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> ManagerResult<PoolInfo> {
        let mut state = self.state.lock().await;
        let record = state.record(&self.name)?;
        Ok(PoolInfo {
            state: if record.active { PoolState::Active } else { PoolState::Inactive },
            capacity: record.capacity,
            allocated: record.allocated,
            available: record.capacity - record.allocated,
        })
    }

    async fn is_active(&self) -> ManagerResult<bool> {
        Ok(self.state.lock().await.record(&self.name)?.active)
    }

    async fn is_persistent(&self) -> ManagerResult<bool> {
        Ok(self.state.lock().await.record(&self.name)?.persistent)
    }

    async fn autostart(&self) -> ManagerResult<bool> {
        Ok(self.state.lock().await.record(&self.name)?.autostart)
    }

    async fn set_autostart(&self, enabled: bool) -> ManagerResult<()> {
        let mut state = self.state.lock().await;
        state.take_failure(&self.name, ManagerOp::SetAutostart)?;
        let record = state.record(&self.name)?;
        if !record.persistent {
            return Err(invalid("cannot set autostart for transient storage pool"));
        }
        record.autostart = enabled;
        Ok(())
    }

    async fn definition(&self) -> ManagerResult<PoolDefinition> {
        Ok(self.state.lock().await.record(&self.name)?.definition.clone())
    }

    async fn build(&self) -> ManagerResult<()> {
        let mut state = self.state.lock().await;
        state.take_failure(&self.name, ManagerOp::Build)?;
        let record = state.record(&self.name)?;
        if record.active {
            return Err(invalid(format!("storage pool '{}' is already active", self.name)));
        }
        if record.definition.kind == PoolKind::Dir {
            let path = record.definition.target_path.clone();
            tokio::fs::create_dir_all(&path).await.map_err(|e| {
                failed(format!("cannot create path '{}': {}", path.display(), e))
            })?;
        }
        Ok(())
    }

    async fn create(&self) -> ManagerResult<()> {
        {
            let mut state = self.state.lock().await;
            state.take_failure(&self.name, ManagerOp::Create)?;
            let record = state.record(&self.name)?;
            if record.active {
                return Err(invalid(format!("storage pool '{}' is already active", self.name)));
            }
            check_target(&record.definition)?;
            record.active = true;
        }
        self.refresh().await
    }

    async fn destroy(&self) -> ManagerResult<()> {
        let mut state = self.state.lock().await;
        state.take_failure(&self.name, ManagerOp::Destroy)?;
        let record = state.record(&self.name)?;
        if !record.active {
            return Err(invalid(format!("storage pool '{}' is not active", self.name)));
        }
        if record.persistent {
            record.active = false;
            record.volumes = 0;
        } else {
            state.pools.remove(&self.name);
            debug!(pool = %self.name, "Transient pool removed");
        }
        Ok(())
    }

    async fn undefine(&self) -> ManagerResult<()> {
        let mut state = self.state.lock().await;
        state.take_failure(&self.name, ManagerOp::Undefine)?;
        let record = state.record(&self.name)?;
        if !record.persistent {
            return Err(invalid("cannot undefine transient storage pool"));
        }
        if record.active {
            // Running pools keep going as transient ones
            record.persistent = false;
            record.autostart = false;
        } else {
            state.pools.remove(&self.name);
        }
        Ok(())
    }

    async fn refresh(&self) -> ManagerResult<()> {
        let definition = {
            let mut state = self.state.lock().await;
            state.take_failure(&self.name, ManagerOp::Refresh)?;
            let record = state.record(&self.name)?;
            if !record.active {
                return Err(invalid(format!("storage pool '{}' is not active", self.name)));
            }
            record.definition.clone()
        };

        if definition.kind != PoolKind::Dir {
            return Ok(());
        }

        let mut volumes = 0u32;
        let mut entries = tokio::fs::read_dir(&definition.target_path).await.map_err(|e| {
            failed(format!(
                "cannot open directory '{}': {}",
                definition.target_path.display(),
                e
            ))
        })?;
        while let Some(_entry) = entries.next_entry().await.map_err(|e| failed(e.to_string()))? {
            volumes += 1;
        }

        let mut state = self.state.lock().await;
        state.record(&self.name)?.volumes = volumes;
        Ok(())
    }

    async fn num_volumes(&self) -> ManagerResult<u32> {
        let mut state = self.state.lock().await;
        let record = state.record(&self.name)?;
        if !record.active {
            return Err(invalid(format!("storage pool '{}' is not active", self.name)));
        }
        Ok(record.volumes)
    }
}

/// Directory pools can only run on an existing directory.
fn check_target(definition: &PoolDefinition) -> ManagerResult<()> {
    if definition.kind == PoolKind::Dir && !definition.target_path.is_dir() {
        return Err(failed(format!(
            "cannot open directory '{}': No such file or directory",
            definition.target_path.display()
        )));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> ManagerError {
    ManagerError::new(ManagerErrorCode::OperationInvalid, message)
}

fn failed(message: impl Into<String>) -> ManagerError {
    ManagerError::new(ManagerErrorCode::OperationFailed, message)
}
