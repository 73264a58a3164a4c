//! 租约会话

use crate::store::{CoordinationStore, LeaseId};
use infrastructure_common::{Context, LeaseError, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 绑定 TTL 租约并在后台自动续期的会话
///
/// 租约在服务端失效或者连续续期失败超过一个 TTL 后，会话变为无效，不会自动恢复。
pub struct Session {
    key: String,
    lease: LeaseId,
    ttl: Duration,
    store: Arc<dyn CoordinationStore>,
    valid: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("lease", &self.lease)
            .field("ttl", &self.ttl)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl Session {
    /// 创建租约并启动续期
    pub async fn new(
        store: Arc<dyn CoordinationStore>,
        ctx: &Context,
        key: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, LeaseError> {
        let key = key.into();
        let lease = store
            .grant_lease(ctx, ttl)
            .await
            .map_err(|source| LeaseError::Grant { key: key.clone(), source })?;
        debug!("创建租约会话: {}, 租约 {}, TTL {:?}", key, lease, ttl);

        let session = Self {
            key,
            lease,
            ttl,
            store,
            valid: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
        };
        session.spawn_keep_alive();
        Ok(session)
    }

    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 租约是否仍然有效
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// 停止续期并撤销租约
    pub async fn close(&self, ctx: &Context) -> Result<(), LeaseError> {
        self.cancel.cancel();
        let was_valid = self.valid.swap(false, Ordering::SeqCst);
        match self.store.revoke_lease(ctx, self.lease).await {
            Ok(()) => Ok(()),
            Err(StoreError::LeaseNotFound { .. }) => {
                debug!("撤销租约时租约已不存在: {}", self.lease);
                Ok(())
            }
            Err(source) if was_valid => Err(LeaseError::Revoke {
                lease_id: self.lease,
                source,
            }),
            Err(e) => {
                debug!("撤销失效租约失败: {}, 原因: {}", self.lease, e);
                Ok(())
            }
        }
    }

    fn spawn_keep_alive(&self) {
        let store = Arc::clone(&self.store);
        let valid = Arc::clone(&self.valid);
        let cancel = self.cancel.clone();
        let lease = self.lease;
        let ttl = self.ttl;
        let key = self.key.clone();
        let period = (ttl / 3).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut last_ok = Instant::now();
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let ctx = Context::with_cancel(cancel.clone()).child_with_timeout(period);
                match store.keep_alive_once(&ctx, lease).await {
                    Ok(_) => last_ok = Instant::now(),
                    Err(StoreError::LeaseNotFound { .. }) => {
                        warn!("租约已失效: {}, 租约 {}", key, lease);
                        break;
                    }
                    Err(e) => {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let error = LeaseError::KeepAlive { lease_id: lease, source: e };
                        warn!("{}", error);
                        if last_ok.elapsed() > ttl {
                            warn!("租约续期超时: {}, 租约 {}", key, lease);
                            break;
                        }
                    }
                }
            }
            valid.store(false, Ordering::SeqCst);
            info!("租约会话失效: {}", key);
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
