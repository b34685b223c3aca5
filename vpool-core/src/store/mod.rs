//! Object store with SQLite persistence.
//!
//! The object store keeps associations the external pool manager cannot
//! represent itself, grouped by collection. Everything is accessed through a
//! [`Session`]: a transaction that becomes durable on [`Session::commit`] and
//! is rolled back when dropped uncommitted.
//!
//! Collections used by vpool:
//! - [`SCANNING`]: transient scan pool name → scan task id

use crate::error::{Result, VpoolError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, instrument};

pub mod migrations;


/// Collection mapping a transient scan pool name to its scan task id.
pub const SCANNING: &str = "scanning";

/// Persisted key-value association service.
#[derive(Clone)]
pub struct ObjectStore {
    pool: SqlitePool,
}

impl ObjectStore {
    /// Create an ObjectStore backed by an in-memory database (for tests).
    pub async fn new_in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    /// Create an ObjectStore with a database at the specified path.
    #[instrument(skip(db_path))]
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let in_memory = db_path == Path::new(":memory:");
        info!("Initializing object store at {:?}", db_path);

        if !in_memory {
            if let Some(parent) = db_path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    VpoolError::InvalidConfig {
                        reason: format!("Failed to create directory {}: {}", parent.display(), e),
                    }
                })?;
            }
        }

        let mut options = SqliteConnectOptions::from_str(db_path.to_str().ok_or_else(|| {
            VpoolError::InvalidConfig { reason: "Invalid database path".to_string() }
        })?)
        .map_err(|e| VpoolError::DatabaseError(e.to_string()))?;

        options = options
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .log_statements(tracing::log::LevelFilter::Debug);

        // An in-memory database only exists while its single connection lives
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| VpoolError::DatabaseError(e.to_string()))?;

        migrations::run(&pool).await?;

        info!("Object store initialized successfully");
        Ok(Self { pool })
    }

    /// Open a scoped session.
    ///
    /// Nothing done inside the session is visible to other sessions until
    /// [`Session::commit`] succeeds.
    pub async fn session(&self) -> Result<Session> {
        let tx = self.pool.begin().await.map_err(|e| db_error("begin", e))?;
        Ok(Session { tx })
    }
}

/// A transactional read/modify/write scope over the object store.
pub struct Session {
    tx: Transaction<'static, Sqlite>,
}

impl Session {
    /// Insert or replace `value` under `collection/key`.
    #[instrument(skip(self, value))]
    pub async fn store<T: Serialize + ?Sized>(
        &mut self,
        collection: &str,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let json = serde_json::to_string(value).map_err(|e| {
            VpoolError::DatabaseError(format!("Failed to serialize {}/{}: {}", collection, key, e))
        })?;
        let updated_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO objects (collection, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (collection, key) DO UPDATE SET value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(json)
        .bind(updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("store", e))?;

        Ok(())
    }

    /// Fetch the value stored under `collection/key`.
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&mut self, collection: &str, key: &str) -> Result<T> {
        let json: String =
            sqlx::query_scalar("SELECT value FROM objects WHERE collection = ? AND key = ?")
                .bind(collection)
                .bind(key)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| db_error("get", e))?
                .ok_or_else(|| VpoolError::ObjectNotFound {
                    collection: collection.to_string(),
                    key: key.to_string(),
                })?;

        serde_json::from_str(&json).map_err(|e| {
            VpoolError::DatabaseError(format!(
                "Failed to deserialize {}/{}: {}",
                collection, key, e
            ))
        })
    }

    /// Remove `collection/key`; fails with ObjectNotFound when absent.
    #[instrument(skip(self))]
    pub async fn delete(&mut self, collection: &str, key: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM objects WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("delete", e))?;

        if result.rows_affected() == 0 {
            return Err(VpoolError::ObjectNotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// List the keys of a collection in ascending order.
    #[instrument(skip(self))]
    pub async fn list(&mut self, collection: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT key FROM objects WHERE collection = ? ORDER BY key")
            .bind(collection)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("list", e))
    }

    /// Make every operation of this session durable.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(|e| db_error("commit", e))?;
        debug!("Object store session committed");
        Ok(())
    }

    /// Discard every operation of this session.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(|e| db_error("rollback", e))
    }
}

fn db_error(operation: &'static str, e: sqlx::Error) -> VpoolError {
    metrics::counter!("vpool_db_errors_total", "operation" => operation).increment(1);
    VpoolError::DatabaseError(e.to_string())
}
