//! Operations on a single storage pool.

use super::{get_pool, manager_failure};
use crate::connection::StorageConnection;
use crate::error::{Result, VpoolError};
use crate::observability::metrics::record_pool_operation;
use crate::store::{ObjectStore, SCANNING};
use crate::types::{PoolState, PoolType, PoolUpdate, StoragePool};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct StoragePoolModel {
    conn: Arc<dyn StorageConnection>,
    store: ObjectStore,
}

impl StoragePoolModel {
    pub fn new(conn: Arc<dyn StorageConnection>, store: ObjectStore) -> Self {
        Self { conn, store }
    }

    /// Current view of pool `name`.
    ///
    /// A pool that is not persistently defined and has a `scanning`
    /// association is a deep scan pool: it is reported as `kimchi-iso`
    /// together with the scan's task id.
    #[instrument(skip(self))]
    pub async fn lookup(&self, name: &str) -> Result<StoragePool> {
        let manager = self.conn.get().await.map_err(|e| manager_failure("connect", e))?;
        let pool = get_pool(manager.as_ref(), name).await?;

        let info = pool.info().await.map_err(|e| manager_failure("info", e))?;
        let definition = pool.definition().await.map_err(|e| manager_failure("definition", e))?;
        let autostart = pool.autostart().await.map_err(|e| manager_failure("autostart", e))?;
        let persistent =
            pool.is_persistent().await.map_err(|e| manager_failure("is_persistent", e))?;

        let nr_volumes = if info.state == PoolState::Active {
            pool.refresh().await.map_err(|e| manager_failure("refresh", e))?;
            pool.num_volumes().await.map_err(|e| manager_failure("num_volumes", e))?
        } else {
            0
        };

        let mut report = StoragePool {
            name: name.to_string(),
            pool_type: PoolType::from(definition.kind),
            state: info.state,
            path: definition.target_path.clone(),
            source: (&definition.source).into(),
            autostart,
            capacity: info.capacity,
            allocated: info.allocated,
            available: info.available,
            nr_volumes,
            task_id: None,
        };

        if !persistent {
            let mut session = self.store.session().await?;
            match session.get::<String>(SCANNING, name).await {
                Ok(task_id) => {
                    report.pool_type = PoolType::KimchiIso;
                    report.task_id = Some(task_id);
                }
                // Transient pool not created by a scan
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Apply `update` and return the pool name. Setting the current value
    /// again is a no-op.
    #[instrument(skip(self, update))]
    pub async fn update(&self, name: &str, update: PoolUpdate) -> Result<String> {
        let value = update.autostart.ok_or_else(|| VpoolError::MissingParameter {
            param: "autostart".to_string(),
            missing: vec!["autostart".to_string()],
        })?;
        let enabled = value.as_bool().ok_or_else(|| {
            VpoolError::invalid(format!("autostart must be a boolean, got {}", value))
        })?;

        let manager = self.conn.get().await.map_err(|e| manager_failure("connect", e))?;
        let pool = get_pool(manager.as_ref(), name).await?;
        pool.set_autostart(enabled).await.map_err(|e| manager_failure("set_autostart", e))?;

        info!(pool = %name, autostart = enabled, "Pool updated");
        Ok(name.to_string())
    }

    /// Start pool `name`.
    #[instrument(skip(self))]
    pub async fn activate(&self, name: &str) -> Result<()> {
        let started = Instant::now();
        let manager = self.conn.get().await.map_err(|e| manager_failure("connect", e))?;
        let pool = get_pool(manager.as_ref(), name).await?;
        pool.create().await.map_err(|e| manager_failure("activate", e))?;

        record_pool_operation("activate", started.elapsed().as_secs_f64());
        info!(pool = %name, "Pool activated");
        Ok(())
    }

    /// Stop pool `name`.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, name: &str) -> Result<()> {
        let started = Instant::now();
        let manager = self.conn.get().await.map_err(|e| manager_failure("connect", e))?;
        let pool = get_pool(manager.as_ref(), name).await?;
        pool.destroy().await.map_err(|e| manager_failure("deactivate", e))?;

        record_pool_operation("deactivate", started.elapsed().as_secs_f64());
        info!(pool = %name, "Pool deactivated");
        Ok(())
    }

    /// Remove the definition of inactive pool `name`.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let started = Instant::now();
        let manager = self.conn.get().await.map_err(|e| manager_failure("connect", e))?;
        let pool = get_pool(manager.as_ref(), name).await?;

        if pool.is_active().await.map_err(|e| manager_failure("is_active", e))? {
            return Err(VpoolError::invalid(format!(
                "Unable to delete the active storage pool {}",
                name
            )));
        }
        pool.undefine().await.map_err(|e| manager_failure("delete", e))?;

        record_pool_operation("delete", started.elapsed().as_secs_f64());
        info!(pool = %name, "Pool deleted");
        Ok(())
    }
}
