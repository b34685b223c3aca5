//! Integration tests for storage pool lifecycle operations.
//!
//! These tests drive the models end to end:
//! - Create (validation, reserved names, duplicates)
//! - Lookup and list
//! - Activate / deactivate / delete
//! - Autostart updates
//!
//! Tests use an in-memory object store and the in-memory pool manager.

mod common;

use common::{request, TestEnv};
use serde_json::json;
use vpool_core::connection::ManagerOp;
use vpool_core::types::{PoolSource, SourceRequest, ISO_POOL_NAME};
use vpool_core::{CreateOutcome, PoolCreateRequest, PoolState, PoolType, PoolUpdate, VpoolError};

#[tokio::test]
async fn test_dir_pool_full_lifecycle() {
    let env = TestEnv::new().await;
    let path = env.path("alt");
    let pools = &env.services.storagepools;
    let pool = &env.services.storagepool;

    let mut req = request("alt", "dir", &path);
    req.capacity = Some(1024);
    req.allocated = Some(512);
    let outcome = pools.create(req).await.unwrap();
    assert_eq!(outcome, CreateOutcome::Pool("alt".to_string()));
    assert!(path.is_dir(), "dir pools are built on create");

    let report = pool.lookup("alt").await.unwrap();
    assert_eq!(report.state, PoolState::Inactive);
    assert_eq!(report.pool_type, PoolType::Dir);
    assert_eq!(report.path, path);
    assert!(report.autostart);
    assert_eq!(report.nr_volumes, 0);
    assert_eq!(report.task_id, None);

    std::fs::write(path.join("disk0.img"), b"data").unwrap();
    pool.activate("alt").await.unwrap();
    let report = pool.lookup("alt").await.unwrap();
    assert_eq!(report.state, PoolState::Active);
    assert_eq!(report.nr_volumes, 1);

    pool.deactivate("alt").await.unwrap();
    assert_eq!(pool.lookup("alt").await.unwrap().state, PoolState::Inactive);

    pool.delete("alt").await.unwrap();
    let err = pool.lookup("alt").await.unwrap_err();
    assert!(matches!(err, VpoolError::PoolNotFound { ref name } if name == "alt"));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_list_is_sorted_and_unique() {
    let env = TestEnv::new().await;
    for name in ["zeta", "alpha", "mid"] {
        env.services.storagepools.create(request(name, "dir", &env.path(name))).await.unwrap();
    }
    env.services.storagepool.activate("mid").await.unwrap();

    let names = env.services.storagepools.list().await.unwrap();
    assert_eq!(names, vec!["alpha", "mid", "zeta"]);
}

#[tokio::test]
async fn test_reserved_name_always_rejected() {
    let env = TestEnv::new().await;

    let full = request(ISO_POOL_NAME, "dir", &env.path("isos"));
    let bare = PoolCreateRequest { name: Some(ISO_POOL_NAME.to_string()), ..Default::default() };

    for req in [full, bare] {
        let err = env.services.storagepools.create(req).await.unwrap_err();
        assert!(matches!(err, VpoolError::InvalidOperation { .. }), "got {err:?}");
    }
    assert!(env.services.storagepools.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_iso_catalog_lookup() {
    let env = TestEnv::new().await;
    let iso = env.services.isopool.lookup(ISO_POOL_NAME).unwrap();
    assert_eq!(iso.pool_type, PoolType::KimchiIso);
    assert_eq!(iso.state, PoolState::Active);
    assert!(env.services.isopool.lookup("alt").unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_concurrent_creates_with_same_name() {
    let env = TestEnv::new().await;
    let path = env.path("dup");
    let pools = env.services.storagepools.clone();

    let (first, second) = tokio::join!(
        pools.create(request("dup", "dir", &path)),
        pools.create(request("dup", "dir", &path)),
    );

    let results = [first, second];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1, "exactly one create must win: {results:?}");
    let err = results.into_iter().find_map(|r| r.err()).unwrap();
    match err {
        VpoolError::InvalidOperation { reason } => assert!(reason.contains("dup")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_of_existing_pool() {
    let env = TestEnv::new().await;
    let pools = &env.services.storagepools;
    pools.create(request("alt", "dir", &env.path("alt"))).await.unwrap();

    let err = pools.create(request("alt", "dir", &env.path("other"))).await.unwrap_err();
    assert!(matches!(
        err,
        VpoolError::InvalidOperation { ref reason } if reason.contains("has been used")
    ));
}

#[tokio::test]
async fn test_validation_happens_before_side_effects() {
    let env = TestEnv::new().await;
    let pools = &env.services.storagepools;

    let err = pools.create(PoolCreateRequest::default()).await.unwrap_err();
    match err {
        VpoolError::MissingParameter { param, missing } => {
            assert_eq!(param, "name");
            assert_eq!(missing, vec!["name", "type"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let netfs = PoolCreateRequest {
        name: Some("nfs".to_string()),
        pool_type: Some("netfs".to_string()),
        source: SourceRequest { host: Some("10.0.0.1".to_string()), ..Default::default() },
        ..Default::default()
    };
    let err = pools.create(netfs).await.unwrap_err();
    assert!(matches!(
        err,
        VpoolError::MissingParameter { ref param, .. } if param == "source.path"
    ));

    assert!(pools.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_netfs_pool_reports_source_without_autostart_build() {
    let env = TestEnv::new().await;
    let req: PoolCreateRequest = serde_json::from_value(json!({
        "name": "nfs",
        "type": "netfs",
        "source": {"host": "10.0.0.1", "path": "/export/isos"}
    }))
    .unwrap();
    env.services.storagepools.create(req).await.unwrap();

    let report = env.services.storagepool.lookup("nfs").await.unwrap();
    assert_eq!(report.pool_type, PoolType::Netfs);
    assert!(report.autostart);
    assert_eq!(
        report.source,
        PoolSource {
            addr: Some("10.0.0.1".to_string()),
            path: Some("/export/isos".to_string()),
            ..Default::default()
        }
    );
}

#[tokio::test]
async fn test_iscsi_pool_has_autostart_disabled() {
    let env = TestEnv::new().await;
    let req: PoolCreateRequest = serde_json::from_value(json!({
        "name": "san",
        "type": "iscsi",
        "source": {"host": "san.local", "target": "iqn.2013-01.example:disk1"}
    }))
    .unwrap();
    env.services.storagepools.create(req).await.unwrap();

    let report = env.services.storagepool.lookup("san").await.unwrap();
    assert_eq!(report.pool_type, PoolType::Iscsi);
    assert!(!report.autostart);
}

#[tokio::test]
async fn test_autostart_update_is_idempotent() {
    let env = TestEnv::new().await;
    env.services.storagepools.create(request("alt", "dir", &env.path("alt"))).await.unwrap();
    let pool = &env.services.storagepool;

    for _ in 0..2 {
        assert_eq!(pool.update("alt", PoolUpdate::autostart(false)).await.unwrap(), "alt");
        assert!(!pool.lookup("alt").await.unwrap().autostart);
    }

    let not_bool = PoolUpdate { autostart: Some(json!("yes")) };
    assert!(matches!(pool.update("alt", not_bool).await, Err(VpoolError::InvalidOperation { .. })));

    let missing = pool.update("alt", PoolUpdate::default()).await.unwrap_err();
    assert_eq!(missing.status_code(), 400);
    assert!(matches!(missing, VpoolError::MissingParameter { .. }));

    assert!(pool.update("ghost", PoolUpdate::autostart(true)).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_active_pool_fails_until_deactivated() {
    let env = TestEnv::new().await;
    env.services.storagepools.create(request("alt", "dir", &env.path("alt"))).await.unwrap();
    let pool = &env.services.storagepool;
    pool.activate("alt").await.unwrap();

    let err = pool.delete("alt").await.unwrap_err();
    assert!(matches!(err, VpoolError::InvalidOperation { .. }));
    assert_eq!(pool.lookup("alt").await.unwrap().state, PoolState::Active);

    pool.deactivate("alt").await.unwrap();
    pool.delete("alt").await.unwrap();
    assert!(env.services.storagepools.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_pool_is_not_found_everywhere() {
    let env = TestEnv::new().await;
    let pool = &env.services.storagepool;

    assert!(pool.lookup("ghost").await.unwrap_err().is_not_found());
    assert!(pool.activate("ghost").await.unwrap_err().is_not_found());
    assert!(pool.deactivate("ghost").await.unwrap_err().is_not_found());
    assert!(pool.delete("ghost").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_manager_failures_become_operation_failed() {
    let env = TestEnv::new().await;
    env.services.storagepools.create(request("alt", "dir", &env.path("alt"))).await.unwrap();

    env.conn.fail_next("alt", ManagerOp::Create, "cannot start pool: device busy").await;
    let err = env.services.storagepool.activate("alt").await.unwrap_err();
    match err {
        VpoolError::OperationFailed { ref message } => {
            assert_eq!(message, "cannot start pool: device busy")
        }
        ref other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status_code(), 500);

    // Deactivating an inactive pool is refused by the manager
    let err = env.services.storagepool.deactivate("alt").await.unwrap_err();
    assert!(matches!(err, VpoolError::OperationFailed { .. }));

    env.conn.set_offline(true).await;
    let err = env.services.storagepools.list().await.unwrap_err();
    assert!(matches!(err, VpoolError::OperationFailed { .. }));
}

#[tokio::test]
async fn test_failed_build_leaves_no_definition() {
    let env = TestEnv::new().await;
    env.conn.fail_next("alt", ManagerOp::Build, "mkdir failed").await;

    let err = env
        .services
        .storagepools
        .create(request("alt", "dir", &env.path("alt")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VpoolError::OperationFailed { ref message } if message == "mkdir failed"
    ));
    assert!(env.services.storagepools.list().await.unwrap().is_empty());

    // The name is free again
    env.services.storagepools.create(request("alt", "dir", &env.path("alt"))).await.unwrap();
}
