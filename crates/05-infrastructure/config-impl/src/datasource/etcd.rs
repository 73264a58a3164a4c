//! 协调存储配置数据源

#[cfg(feature = "etcd")]
use super::DataSourceAddr;
use async_trait::async_trait;
use config_abstractions::{ChangeChannel, ChangeSignal, DataSource};
use coordination_store::{CoordinationStore, RevisionTracker, Watch, WatchConfig};
use infrastructure_common::{Context, DataSourceError, DataSourceResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// 协调存储配置数据源
///
/// 配置内容保存在单个键中，键的任何写入或删除都会发出变更信号。
pub struct EtcdDataSource {
    store: Arc<dyn CoordinationStore>,
    key: String,
    changed: Arc<ChangeChannel>,
    revision: RevisionTracker,
    cancel: CancellationToken,
}

impl std::fmt::Debug for EtcdDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdDataSource")
            .field("key", &self.key)
            .field("revision", &self.revision.get())
            .finish()
    }
}

impl EtcdDataSource {
    /// 在给定存储上创建数据源并开始监听配置键，必须在 tokio 运行时内调用
    pub fn new(store: Arc<dyn CoordinationStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let changed = Arc::new(ChangeChannel::new());
        let cancel = CancellationToken::new();

        let mut watch = Watch::key(Arc::clone(&store), key.clone(), 0, WatchConfig::default());
        let revision = watch.revision_tracker();
        {
            let changed = Arc::clone(&changed);
            let cancel = cancel.clone();
            let key = key.clone();
            tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = watch.recv() => event,
                    };
                    let Some(event) = event else { break };
                    debug!("配置键发生变化: {}, 修订版本 {}", key, event.kv.mod_revision);
                    changed.notify();
                }
                debug!("配置键监听结束: {}", key);
            });
        }

        info!("开始监听协调存储配置: {}", key);
        Self {
            store,
            key,
            changed,
            revision,
            cancel,
        }
    }

    /// 由配置地址创建
    ///
    /// 形如 `etcdv3://host:port?key=/app/config&basicAuth=true&username=u&password=p`，
    /// 另外支持 `certFile`、`keyFile`、`caCert`、`secure`。
    #[cfg(feature = "etcd")]
    pub async fn from_addr(addr: &DataSourceAddr) -> DataSourceResult<Self> {
        use coordination_store::{EtcdConfig, EtcdStore};

        let key = addr
            .query("key")
            .ok_or_else(|| DataSourceError::invalid_address(addr.as_str(), "缺少 key 参数"))?
            .to_string();
        let endpoint = addr
            .host_port()
            .ok_or_else(|| DataSourceError::invalid_address(addr.as_str(), "缺少主机地址"))?;

        let config = EtcdConfig {
            endpoints: vec![endpoint],
            basic_auth: addr.query_bool("basicAuth", false),
            user_name: addr.query("username").unwrap_or_default().to_string(),
            password: addr.query("password").unwrap_or_default().to_string(),
            cert_file: addr.query("certFile").unwrap_or_default().to_string(),
            key_file: addr.query("keyFile").unwrap_or_default().to_string(),
            ca_cert: addr.query("caCert").unwrap_or_default().to_string(),
            secure: addr.query_bool("secure", false),
            ..EtcdConfig::default()
        };
        let store = EtcdStore::connect(&config).await?;
        Ok(Self::new(Arc::new(store), key))
    }

    /// 配置所在的键
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 已观察到的最大修订版本
    pub fn revision(&self) -> i64 {
        self.revision.get()
    }
}

#[async_trait]
impl DataSource for EtcdDataSource {
    async fn read_config(&self) -> DataSourceResult<Vec<u8>> {
        let ctx = Context::with_timeout(READ_TIMEOUT);
        let resp = self.store.get(&ctx, &self.key, false).await?;
        self.revision.observe(resp.revision);
        let kv = resp
            .kvs
            .into_iter()
            .next()
            .ok_or_else(|| DataSourceError::EmptyContent { key: self.key.clone() })?;
        Ok(kv.value)
    }

    fn is_config_changed(&self) -> Option<ChangeSignal> {
        self.changed.take_signal()
    }

    async fn close(&self) -> DataSourceResult<()> {
        self.cancel.cancel();
        self.changed.close();
        Ok(())
    }

    fn name(&self) -> &str {
        super::SCHEME_ETCDV3
    }
}

impl Drop for EtcdDataSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination_store::MemoryStore;

    #[tokio::test]
    async fn test_read_and_change_signal() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Context::background();
        store.put(&ctx, "/app/config", b"a = 1".to_vec(), None).await.unwrap();

        let ds = EtcdDataSource::new(store.clone(), "/app/config");
        assert_eq!(ds.read_config().await.unwrap(), b"a = 1");
        assert_eq!(ds.revision(), 1);

        let mut signal = ds.is_config_changed().expect("应有变更信号");
        assert!(ds.is_config_changed().is_none(), "变更信号只能取一次");
        tokio::time::sleep(Duration::from_millis(50)).await;

        store.put(&ctx, "/app/config", b"a = 2".to_vec(), None).await.unwrap();
        let changed = tokio::time::timeout(Duration::from_secs(2), signal.changed()).await;
        assert_eq!(changed.ok().flatten(), Some(()));
        assert_eq!(ds.read_config().await.unwrap(), b"a = 2");
    }

    #[tokio::test]
    async fn test_missing_key_is_empty_content() {
        let store = Arc::new(MemoryStore::new());
        let ds = EtcdDataSource::new(store, "/absent");
        assert!(matches!(
            ds.read_config().await,
            Err(DataSourceError::EmptyContent { .. })
        ));
    }
}
