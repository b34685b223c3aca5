//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vpool_core::{Config, MemoryConnection, ObjectStore, PoolCreateRequest, Services};

/// Services wired to an in-memory manager and object store.
pub struct TestEnv {
    pub temp: TempDir,
    pub conn: MemoryConnection,
    pub services: Services,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_ttl(300).await
    }

    pub async fn with_ttl(scan_ttl_secs: u64) -> Self {
        let temp = TempDir::new().unwrap();
        let config = Config {
            staging_dir: temp.path().join("staging").to_string_lossy().to_string(),
            scan_ttl_secs,
            scan_timeout_secs: 30,
            max_concurrent_tasks: 2,
            max_pending_tasks: 8,
            ..Config::default()
        };
        let conn = MemoryConnection::new();
        let store = ObjectStore::new_in_memory().await.unwrap();
        let services = Services::with_store(config, Arc::new(conn.clone()), store).await.unwrap();
        Self { temp, conn, services }
    }

    /// Directory under the test's temp dir, created on demand.
    pub fn dir(&self, name: &str) -> PathBuf {
        let path = self.temp.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    /// A path under the temp dir that does not exist yet.
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }
}

pub fn request(name: &str, pool_type: &str, path: &Path) -> PoolCreateRequest {
    PoolCreateRequest {
        name: Some(name.to_string()),
        pool_type: Some(pool_type.to_string()),
        path: Some(path.to_path_buf()),
        ..PoolCreateRequest::default()
    }
}

/// Write a file carrying an ISO-9660 primary volume descriptor.
pub fn write_iso(path: &Path) {
    let mut data = vec![0u8; 34 * 1024];
    data[32768] = 1;
    data[32769..32774].copy_from_slice(b"CD001");
    data[32774] = 1;
    std::fs::write(path, data).unwrap();
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
