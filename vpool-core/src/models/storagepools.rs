//! The storage pool collection: listing and creation.

use super::{manager_failure, StoragePoolModel};
use crate::connection::StorageConnection;
use crate::descriptor::PoolDefinition;
use crate::error::{Result, VpoolError};
use crate::observability::metrics::{record_pool_created, record_pool_operation};
use crate::scanner::{ScanJob, Scanner};
use crate::types::{CreateOutcome, PoolCreateRequest, PoolSpec, PoolState, PoolType, ISO_POOL_NAME};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct StoragePoolsModel {
    conn: Arc<dyn StorageConnection>,
    scanner: Scanner,
    pool: StoragePoolModel,
    /// Names of creates in flight in this process
    reserved: Arc<Mutex<HashSet<String>>>,
}

impl StoragePoolsModel {
    pub fn new(conn: Arc<dyn StorageConnection>, scanner: Scanner, pool: StoragePoolModel) -> Self {
        Self { conn, scanner, pool, reserved: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Names of all active and defined pools, sorted.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<String>> {
        let manager = self.conn.get().await.map_err(|e| manager_failure("connect", e))?;
        let mut names = manager.list_active().await.map_err(|e| manager_failure("list", e))?;
        names.extend(manager.list_defined().await.map_err(|e| manager_failure("list", e))?);
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Create a pool.
    ///
    /// `kimchi-iso` requests start a deep scan of `path` and return the
    /// scan's task id; the pool exists as soon as this returns. Every other
    /// type is defined and built synchronously and the pool name returned.
    #[instrument(skip(self, request), fields(name = ?request.name, pool_type = ?request.pool_type))]
    pub async fn create(&self, request: PoolCreateRequest) -> Result<CreateOutcome> {
        if request.name.as_deref() == Some(ISO_POOL_NAME) {
            return Err(VpoolError::invalid(format!(
                "Storage pool {} already exists",
                ISO_POOL_NAME
            )));
        }

        let spec = request.into_spec()?;
        let _reservation = self.reserve(&spec.name)?;

        if self.list().await?.contains(&spec.name) {
            return Err(name_in_use(&spec.name));
        }

        let started = Instant::now();
        let pool_type = spec.pool_type;
        let outcome = if spec.pool_type == PoolType::KimchiIso {
            CreateOutcome::Task(self.deep_scan(spec).await?)
        } else {
            let name = spec.name.clone();
            self.define(spec).await?;
            CreateOutcome::Pool(name)
        };

        record_pool_created(pool_type.as_str());
        record_pool_operation("create", started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Define, build and configure autostart for a regular pool.
    async fn define(&self, spec: PoolSpec) -> Result<()> {
        let definition = PoolDefinition::from_spec(&spec);
        let manager = self.conn.get().await.map_err(|e| manager_failure("connect", e))?;
        let pool = manager.define(&definition).await.map_err(|e| manager_failure("define", e))?;

        if definition.kind.is_on_disk() {
            if let Err(e) = pool.build().await {
                if let Err(undo) = pool.undefine().await {
                    warn!(
                        pool = %spec.name,
                        error = %undo,
                        "Cannot remove definition of unbuilt pool"
                    );
                }
                return Err(manager_failure("build", e));
            }
            pool.set_autostart(true).await.map_err(|e| manager_failure("set_autostart", e))?;
        } else {
            pool.set_autostart(false).await.map_err(|e| manager_failure("set_autostart", e))?;
        }

        info!(pool = %spec.name, kind = %definition.kind, "Pool created");
        Ok(())
    }

    /// Start a transient pool on a fresh staging directory and scan
    /// `spec.path` into it.
    async fn deep_scan(&self, spec: PoolSpec) -> Result<String> {
        let scan_path = spec.path.clone().ok_or_else(|| VpoolError::MissingParameter {
            param: "path".to_string(),
            missing: vec!["path".to_string()],
        })?;
        let ignore_list = self.ignore_list().await?;

        let pool_path = self.scanner.scan_dir_prepare(&spec.name).await?;
        let definition = PoolDefinition::dir(&spec.name, &pool_path);

        let started = async {
            let manager = self.conn.get().await?;
            manager.create_transient(&definition).await
        };
        if let Err(e) = started.await {
            self.scanner.discard(&pool_path).await;
            return Err(manager_failure("create_transient", e));
        }

        let job = ScanJob { pool_name: spec.name.clone(), scan_path, ignore_list, pool_path };
        self.scanner.start_scan(job).await
    }

    /// Paths of active pools; a scan never descends into them.
    async fn ignore_list(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for name in self.list().await? {
            match self.pool.lookup(&name).await {
                Ok(pool) if pool.state == PoolState::Active => paths.push(pool.path),
                Ok(_) => {}
                Err(e) => debug!(pool = %name, error = %e, "Skipping pool for ignore list"),
            }
        }
        Ok(paths)
    }

    fn reserve(&self, name: &str) -> Result<Reservation> {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        if !reserved.insert(name.to_string()) {
            return Err(name_in_use(name));
        }
        Ok(Reservation { reserved: self.reserved.clone(), name: name.to_string() })
    }
}

fn name_in_use(name: &str) -> VpoolError {
    VpoolError::invalid(format!("The name {} has been used by a pool", name))
}

/// Releases a create reservation when dropped.
struct Reservation {
    reserved: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.reserved.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.name);
    }
}
