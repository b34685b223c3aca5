//! Process-wide services, wired once at startup.

use crate::config::Config;
use crate::connection::StorageConnection;
use crate::error::Result;
use crate::models::{IsoPoolModel, StoragePoolModel, StoragePoolsModel};
use crate::scanner::{ScanSettings, Scanner};
use crate::store::ObjectStore;
use crate::tasks::TaskRegistry;
use crate::types::Task;
use std::sync::Arc;
use tracing::{info, instrument};

/// Everything the REST layer calls into. Cheap to clone.
#[derive(Clone)]
pub struct Services {
    pub config: Config,
    pub store: ObjectStore,
    pub tasks: TaskRegistry,
    pub scanner: Scanner,
    pub storagepools: StoragePoolsModel,
    pub storagepool: StoragePoolModel,
    pub isopool: IsoPoolModel,
}

impl Services {
    /// Open the object store at `config.db_path` and wire the models.
    #[instrument(skip_all)]
    pub async fn init(config: Config, conn: Arc<dyn StorageConnection>) -> Result<Self> {
        config.validate()?;
        let store = ObjectStore::new(&config.db_path).await?;
        Self::with_store(config, conn, store).await
    }

    /// Wire the models around an existing object store.
    pub async fn with_store(
        config: Config,
        conn: Arc<dyn StorageConnection>,
        store: ObjectStore,
    ) -> Result<Self> {
        config.validate()?;
        let tasks = TaskRegistry::from_config(&config);
        let scanner = Scanner::new(
            ScanSettings::from_config(&config),
            tasks.clone(),
            store.clone(),
            conn.clone(),
        )
        .await;
        let storagepool = StoragePoolModel::new(conn.clone(), store.clone());
        let storagepools = StoragePoolsModel::new(conn, scanner.clone(), storagepool.clone());

        info!(
            max_concurrent_tasks = config.max_concurrent_tasks,
            max_pending_tasks = config.max_pending_tasks,
            "Services initialized"
        );

        Ok(Self {
            config,
            store,
            tasks,
            scanner,
            storagepools,
            storagepool,
            isopool: IsoPoolModel::new(),
        })
    }

    /// Snapshot of task `task_id`.
    pub async fn task(&self, task_id: &str) -> Result<Task> {
        self.tasks.get(task_id).await
    }

    /// Ids of every known task.
    pub async fn task_list(&self) -> Vec<String> {
        self.tasks.list().await
    }
}
