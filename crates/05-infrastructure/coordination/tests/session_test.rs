//! 租约会话的集成测试

use coordination_store::{CoordinationStore, MemoryStore, Session};
use infrastructure_common::{Context, LeaseError, StoreError};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_session_keeps_lease_alive() {
    let store = Arc::new(MemoryStore::new());
    let ctx = Context::background();
    let session = Session::new(store.clone(), &ctx, "/ox/svc", Duration::from_millis(300))
        .await
        .unwrap();
    store
        .put(&ctx, "/ox/svc", b"v".to_vec(), Some(session.lease()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(session.is_valid(), "续期期间会话应保持有效");
    assert_eq!(store.lease_count(), 1);
    assert_eq!(store.get(&ctx, "/ox/svc", false).await.unwrap().kvs.len(), 1);

    session.close(&ctx).await.unwrap();
    assert!(!session.is_valid());
    assert_eq!(store.lease_count(), 0);
    assert!(store.get(&ctx, "/ox/svc", false).await.unwrap().kvs.is_empty(), "撤销租约后键应被删除");
}

#[tokio::test]
async fn test_session_invalidated_when_lease_lost() {
    let store = Arc::new(MemoryStore::new());
    let ctx = Context::background();
    let session = Session::new(store.clone(), &ctx, "/ox/svc", Duration::from_millis(150))
        .await
        .unwrap();

    assert!(store.expire_lease(session.lease()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!session.is_valid(), "租约丢失后会话应失效");

    session.close(&ctx).await.expect("关闭失效会话不应报错");
}

#[tokio::test]
async fn test_dropped_session_lets_lease_expire() {
    let store = Arc::new(MemoryStore::new());
    let ctx = Context::background();
    let session = Session::new(store.clone(), &ctx, "/ox/svc", Duration::from_millis(100))
        .await
        .unwrap();
    drop(session);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(store.lease_count(), 0);
}

#[tokio::test]
async fn test_grant_respects_canceled_context() {
    let store = Arc::new(MemoryStore::new());
    let ctx = Context::background();
    ctx.cancel();

    let result = Session::new(store, &ctx, "/ox/svc", Duration::from_secs(1)).await;
    assert!(matches!(
        result,
        Err(LeaseError::Grant {
            source: StoreError::Context { .. },
            ..
        })
    ));
}
