//! 基于协调存储的注册中心

use crate::config::RegistryConfig;
use crate::endpoints::{build_endpoints, delete_endpoints, update_endpoints};
use async_trait::async_trait;
use coordination_store::{CoordinationStore, EventType, Session, Watch, WatchConfig};
use dashmap::DashMap;
use futures::future::join_all;
use infrastructure_common::{env, Context, RegistryError, RegistryResult, StoreError};
use parking_lot::{Mutex, RwLock};
use registry_abstractions::{
    metric_key, providers_prefix, service_key, service_prefix, service_value, Endpoints, EndpointsStream, Registry,
    ServiceInfo, ServiceKind, ENDPOINTS_BUFFER,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 关闭时注销单个键的超时
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// 基于协调存储的注册中心
///
/// 注册记录写在 `/{prefix}/{name}/providers/{scheme}://{address}`。`service_ttl` 大于 0 时
/// 每个键绑定一个自动续期的租约会话，进程退出后记录随租约过期。
///
/// 同一 `(name, scheme)` 的多个订阅共享一个前缀监听与一份端点聚合，
/// 聚合只由后台任务修改，订阅方收到的都是拷贝。
pub struct EtcdV3Registry {
    store: Arc<dyn CoordinationStore>,
    config: RegistryConfig,
    kvs: DashMap<String, String>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    hubs: tokio::sync::Mutex<HashMap<(String, String), Arc<WatchHub>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl std::fmt::Debug for EtcdV3Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdV3Registry")
            .field("prefix", &self.config.prefix)
            .field("service_ttl", &self.config.service_ttl)
            .field("registered", &self.kvs.len())
            .field("sessions", &self.sessions.read().len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl EtcdV3Registry {
    pub fn new(store: Arc<dyn CoordinationStore>, config: RegistryConfig) -> Self {
        info!(
            "创建注册中心: 前缀 {}, 读超时 {:?}, 服务 TTL {:?}",
            config.prefix, config.read_timeout, config.service_ttl
        );
        Self {
            store,
            config,
            kvs: DashMap::new(),
            sessions: RwLock::new(HashMap::new()),
            hubs: tokio::sync::Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// 连接 etcd 并创建注册中心
    #[cfg(feature = "etcd")]
    pub async fn connect(config: RegistryConfig) -> RegistryResult<Self> {
        let store = coordination_store::EtcdStore::connect(&config.etcd)
            .await
            .map_err(|source| RegistryError::Connect {
                endpoints: config.etcd.endpoints.join(","),
                source,
            })?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// 本进程注册过且尚未注销的键
    pub fn registered_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.kvs.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// 持有的租约会话数量
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// 获取键的会话，已有会话失效时重新创建
    async fn get_session(&self, ctx: &Context, key: &str) -> RegistryResult<Arc<Session>> {
        let existing = self.sessions.read().get(key).filter(|s| s.is_valid()).cloned();
        if let Some(session) = existing {
            return Ok(session);
        }

        let created = Arc::new(Session::new(Arc::clone(&self.store), ctx, key, self.config.service_ttl).await?);
        let (session, discarded) = {
            let mut sessions = self.sessions.write();
            let reuse = sessions.get(key).filter(|s| s.is_valid()).cloned();
            match reuse {
                // 并发注册已经建立了有效会话
                Some(session) => (session, Some(created)),
                None => (Arc::clone(&created), sessions.insert(key.to_string(), created)),
            }
        };

        if let Some(discarded) = discarded {
            debug!("释放多余的租约会话: {}, 租约 {}", key, discarded.lease());
            if let Err(e) = discarded.close(ctx).await {
                warn!("释放租约会话失败: {}, 原因: {}", key, e);
            }
        }
        Ok(session)
    }

    async fn put(&self, ctx: &Context, key: &str, value: &str) -> RegistryResult<()> {
        let mut retried = false;
        loop {
            let lease = if self.config.service_ttl > Duration::ZERO {
                Some(self.get_session(ctx, key).await?.lease())
            } else {
                None
            };

            match self.store.put(ctx, key, value.as_bytes().to_vec(), lease).await {
                Ok(_) => break,
                Err(StoreError::LeaseNotFound { lease_id }) if !retried => {
                    warn!("注册时租约已失效，重新创建会话: {}, 租约 {}", key, lease_id);
                    self.sessions.write().remove(key);
                    retried = true;
                }
                Err(source) => {
                    error!("注册服务失败: {}, 原因: {}", key, source);
                    return Err(RegistryError::Write {
                        key: key.to_string(),
                        source,
                    });
                }
            }
        }

        info!("注册服务: {} => {}", key, value);
        self.kvs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn unregister(&self, ctx: &Context, key: &str) -> RegistryResult<()> {
        let session = self.sessions.write().remove(key);
        if let Some(session) = session {
            session.close(ctx).await?;
        }

        self.store
            .delete(ctx, key, false)
            .await
            .map_err(|source| RegistryError::Delete {
                key: key.to_string(),
                source,
            })?;
        self.kvs.remove(key);
        Ok(())
    }

    fn metric_record_key(info: &ServiceInfo) -> String {
        metric_key(&info.name, &env::hostname(), &info.address)
    }
}

#[async_trait]
impl Registry for EtcdV3Registry {
    fn kind(&self) -> &str {
        "etcdv3"
    }

    async fn register_service(&self, ctx: &Context, info: &ServiceInfo) -> RegistryResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }
        let ctx = ctx.or_timeout(self.config.read_timeout);

        let key = service_key(&self.config.prefix, info);
        let value = service_value(info)?;
        self.put(&ctx, &key, &value).await?;

        if info.kind == ServiceKind::Governor {
            self.put(&ctx, &Self::metric_record_key(info), &info.address).await?;
        }
        Ok(())
    }

    async fn unregister_service(&self, ctx: &Context, info: &ServiceInfo) -> RegistryResult<()> {
        let ctx = ctx.or_timeout(self.config.read_timeout);
        self.unregister(&ctx, &service_key(&self.config.prefix, info)).await?;
        if info.kind == ServiceKind::Governor {
            self.unregister(&ctx, &Self::metric_record_key(info)).await?;
        }
        info!("注销服务: {}", info.label());
        Ok(())
    }

    async fn list_services(&self, ctx: &Context, name: &str, scheme: &str) -> RegistryResult<Vec<ServiceInfo>> {
        let ctx = ctx.or_timeout(self.config.read_timeout);
        let prefix = providers_prefix(&self.config.prefix, name, scheme);
        let response = self
            .store
            .get(&ctx, &prefix, true)
            .await
            .map_err(|source| RegistryError::Read {
                key: prefix.clone(),
                source,
            })?;

        let services = response
            .kvs
            .iter()
            .filter_map(|kv| match serde_json::from_slice::<ServiceInfo>(&kv.value) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!("跳过无法解析的注册记录: {}, 原因: {}", kv.key, e);
                    None
                }
            })
            .collect();
        Ok(services)
    }

    async fn watch_services(&self, ctx: &Context, name: &str, scheme: &str) -> RegistryResult<EndpointsStream> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }

        let hub_key = (name.to_string(), scheme.to_string());
        let mut hubs = self.hubs.lock().await;
        if let Some(stream) = hubs.get(&hub_key).and_then(|hub| hub.subscribe()) {
            debug!("复用已有的服务订阅: {}/{}", name, scheme);
            return Ok(stream);
        }

        let prefix = service_prefix(&self.config.prefix, name);
        let ctx = ctx.or_timeout(self.config.read_timeout);
        let watch = Watch::prefix(Arc::clone(&self.store), &ctx, prefix.clone(), WatchConfig::default())
            .await
            .map_err(|source| RegistryError::Watch {
                key: prefix.clone(),
                source,
            })?;

        info!("订阅服务端点: {}, 协议 {}", prefix, scheme);
        let (hub, stream) = WatchHub::spawn(watch, prefix, scheme.to_string(), self.cancel.child_token());
        hubs.insert(hub_key, hub);
        Ok(stream)
    }

    async fn close(&self) -> RegistryResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        self.hubs.lock().await.clear();

        let registered: Vec<(String, String)> = self
            .kvs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        join_all(registered.into_iter().map(|(key, value)| async move {
            let ctx = Context::with_timeout(CLOSE_TIMEOUT);
            match self.unregister(&ctx, &key).await {
                Ok(()) => info!("注销服务: {} => {}", key, value),
                Err(e) => error!("注销服务失败: {}, 原因: {}", key, e),
            }
        }))
        .await;

        let remaining: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in remaining {
            let ctx = Context::with_timeout(CLOSE_TIMEOUT);
            if let Err(e) = session.close(&ctx).await {
                warn!("关闭租约会话失败: {}, 原因: {}", session.key(), e);
            }
        }

        info!("注册中心已关闭: {}", self.config.prefix);
        Ok(())
    }
}

struct HubState {
    snapshot: Endpoints,
    subscribers: Vec<mpsc::Sender<Endpoints>>,
}

/// 同一服务与协议的共享订阅
///
/// 后台任务独占端点聚合，每次变更后把拷贝推送给所有订阅方；没有订阅方或注册中心关闭时退出。
struct WatchHub {
    state: Mutex<HubState>,
    cancel: CancellationToken,
}

impl WatchHub {
    /// 启动后台任务，返回共享订阅与首个订阅方的流
    ///
    /// 首个订阅方在任务启动前登记，任务处理的第一条事件一定有人接收。
    fn spawn(watch: Watch, prefix: String, scheme: String, cancel: CancellationToken) -> (Arc<Self>, EndpointsStream) {
        let al = build_endpoints(&prefix, &scheme, watch.incipient_key_values());
        let (sender, receiver) = mpsc::channel(ENDPOINTS_BUFFER);
        // 新建的通道必有空位
        let _ = sender.try_send(al.clone());
        let hub = Arc::new(Self {
            state: Mutex::new(HubState {
                snapshot: al.clone(),
                subscribers: vec![sender],
            }),
            cancel,
        });

        let task = Arc::clone(&hub);
        tokio::spawn(async move {
            task.run(watch, prefix, scheme, al).await;
        });
        (hub, receiver)
    }

    /// 新增订阅方，首个元素是当前快照；订阅已结束时返回 `None`
    fn subscribe(&self) -> Option<EndpointsStream> {
        let mut state = self.state.lock();
        if self.cancel.is_cancelled() {
            return None;
        }
        let (sender, receiver) = mpsc::channel(ENDPOINTS_BUFFER);
        if sender.try_send(state.snapshot.clone()).is_err() {
            return None;
        }
        state.subscribers.push(sender);
        Some(receiver)
    }

    async fn run(&self, mut watch: Watch, prefix: String, scheme: String, mut al: Endpoints) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = watch.recv() => event,
            };
            let Some(event) = event else { break };

            match event.event_type {
                EventType::Put => update_endpoints(&mut al, &prefix, &scheme, &event.kv),
                EventType::Delete => delete_endpoints(&mut al, &prefix, &scheme, &event.kv.key),
            }
            if !self.publish(&al, &prefix) {
                debug!("服务订阅已无订阅方: {}", prefix);
                break;
            }
        }

        watch.close();
        // 丢弃发送端，订阅方的流随之结束
        let mut state = self.state.lock();
        self.cancel.cancel();
        state.subscribers.clear();
        debug!("服务订阅结束: {}, 协议 {}", prefix, scheme);
    }

    fn publish(&self, al: &Endpoints, prefix: &str) -> bool {
        let mut state = self.state.lock();
        state.snapshot = al.clone();
        state.subscribers.retain(|sender| match sender.try_send(al.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("端点快照消费过慢，丢弃本次推送: {}", prefix);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        if state.subscribers.is_empty() {
            self.cancel.cancel();
            return false;
        }
        true
    }
}
