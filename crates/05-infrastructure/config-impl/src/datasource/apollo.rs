//! Apollo 配置中心数据源
//!
//! 客户端从 `/configs/{appId}/{cluster}/{namespace}` 拉取配置，并通过 `/notifications/v2` 长轮询感知发布；
//! 每次拉取成功都会写入本地备份，配置中心不可用时从备份恢复。

use super::DataSourceAddr;
use async_trait::async_trait;
use config_abstractions::{ChangeChannel, ChangeSignal, DataSource};
use infrastructure_common::{DataSourceError, DataSourceResult};
use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Apollo 客户端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApolloConfig {
    /// 配置服务地址，`host:port` 或完整 URL
    pub meta_addr: String,
    pub app_id: String,
    pub cluster: String,
    pub namespace: String,
    /// 本地备份目录
    pub cache_dir: PathBuf,
    pub insecure_skip_verify: bool,
    /// 长轮询超时
    pub long_poll_timeout: Duration,
    /// 两次长轮询之间的最小间隔
    pub min_poll_interval: Duration,
}

impl Default for ApolloConfig {
    fn default() -> Self {
        Self {
            meta_addr: String::new(),
            app_id: String::new(),
            cluster: "default".to_string(),
            namespace: "application".to_string(),
            cache_dir: PathBuf::from("."),
            insecure_skip_verify: true,
            long_poll_timeout: Duration::from_secs(90),
            min_poll_interval: Duration::from_secs(1),
        }
    }
}

impl ApolloConfig {
    fn base_url(&self) -> String {
        let addr = self.meta_addr.trim_end_matches('/');
        if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        }
    }

    fn backup_file(&self) -> PathBuf {
        self.cache_dir
            .join(format!("{}_{}_{}.json", self.app_id, self.cluster, self.namespace))
    }
}

/// 配置发布事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApolloChangeEvent {
    pub namespace: String,
    /// 新增、修改或删除的配置项
    pub changed_keys: Vec<String>,
}

type UpdateHandler = Arc<dyn Fn(&ApolloChangeEvent) + Send + Sync>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApolloConfigResponse {
    #[serde(default)]
    release_key: String,
    #[serde(default)]
    configurations: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApolloNotification {
    namespace_name: String,
    notification_id: i64,
}

/// Apollo 配置中心客户端
pub struct ApolloClient {
    config: ApolloConfig,
    http: reqwest::Client,
    configurations: RwLock<HashMap<String, String>>,
    release_key: Mutex<String>,
    notification_id: AtomicI64,
    handlers: RwLock<Vec<UpdateHandler>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ApolloClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApolloClient")
            .field("config", &self.config)
            .field("notification_id", &self.notification_id.load(Ordering::Relaxed))
            .field("handlers_count", &self.handlers.read().len())
            .finish()
    }
}

impl ApolloClient {
    /// 创建新的客户端
    pub fn new(config: ApolloConfig) -> DataSourceResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .map_err(|e| DataSourceError::backend(format!("创建 Apollo HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            config,
            http,
            configurations: RwLock::new(HashMap::new()),
            release_key: Mutex::new(String::new()),
            notification_id: AtomicI64::new(-1),
            handlers: RwLock::new(Vec::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ApolloConfig {
        &self.config
    }

    /// 首次拉取配置并启动长轮询
    ///
    /// 配置中心不可用时从本地备份恢复，两者都失败才返回错误。
    pub async fn start(self: &Arc<Self>) -> DataSourceResult<()> {
        if let Err(e) = self.fetch().await {
            self.restore_backup().await.map_err(|backup_err| {
                warn!("读取 Apollo 本地备份失败: {}", backup_err);
                e
            })?;
        }

        let client = Arc::clone(self);
        tokio::spawn(async move { client.long_poll_loop().await });
        info!(
            "Apollo 客户端已启动: app_id={}, cluster={}, namespace={}",
            self.config.app_id, self.config.cluster, self.config.namespace
        );
        Ok(())
    }

    /// 停止长轮询
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// 读取配置项
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.configurations.read().get(key).cloned()
    }

    /// 注册配置发布回调
    pub fn on_update<F>(&self, handler: F)
    where
        F: Fn(&ApolloChangeEvent) + Send + Sync + 'static,
    {
        self.handlers.write().push(Arc::new(handler));
    }

    /// 拉取一次配置，返回发生变化的配置项
    pub async fn fetch(&self) -> DataSourceResult<Vec<String>> {
        let url = format!(
            "{}/configs/{}/{}/{}",
            self.config.base_url(),
            self.config.app_id,
            self.config.cluster,
            self.config.namespace
        );
        let release_key = self.release_key.lock().clone();
        let response = self
            .http
            .get(&url)
            .query(&[("releaseKey", release_key.as_str())])
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| http_error(&url, e))?;

        match response.status() {
            StatusCode::NOT_MODIFIED => return Ok(Vec::new()),
            status if !status.is_success() => {
                return Err(DataSourceError::Http {
                    url,
                    message: format!("状态码 {}", status),
                })
            }
            _ => {}
        }

        let payload: ApolloConfigResponse = response.json().await.map_err(|e| http_error(&url, e))?;
        *self.release_key.lock() = payload.release_key;
        let changed_keys = self.replace(payload.configurations.clone());
        if !changed_keys.is_empty() {
            self.write_backup(&payload.configurations).await;
        }
        Ok(changed_keys)
    }

    fn replace(&self, next: HashMap<String, String>) -> Vec<String> {
        let mut current = self.configurations.write();
        let mut changed: Vec<String> = next
            .iter()
            .filter(|(k, v)| current.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .chain(current.keys().filter(|k| !next.contains_key(*k)).cloned())
            .collect();
        changed.sort();
        *current = next;
        changed
    }

    /// 等待下一次发布通知，返回是否有新的发布
    async fn poll_notifications(&self) -> DataSourceResult<bool> {
        let url = format!("{}/notifications/v2", self.config.base_url());
        let notifications = serde_json::to_string(&[ApolloNotification {
            namespace_name: self.config.namespace.clone(),
            notification_id: self.notification_id.load(Ordering::Acquire),
        }])
        .map_err(|e| DataSourceError::backend(e.to_string()))?;

        let response = self
            .http
            .get(&url)
            .query(&[
                ("appId", self.config.app_id.as_str()),
                ("cluster", self.config.cluster.as_str()),
                ("notifications", notifications.as_str()),
            ])
            .timeout(self.config.long_poll_timeout)
            .send()
            .await
            .map_err(|e| http_error(&url, e))?;

        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(false),
            status if status.is_success() => {
                let updates: Vec<ApolloNotification> =
                    response.json().await.map_err(|e| http_error(&url, e))?;
                for update in updates
                    .iter()
                    .filter(|n| n.namespace_name == self.config.namespace)
                {
                    self.notification_id
                        .fetch_max(update.notification_id, Ordering::AcqRel);
                }
                Ok(true)
            }
            status => Err(DataSourceError::Http {
                url,
                message: format!("状态码 {}", status),
            }),
        }
    }

    async fn long_poll_loop(&self) {
        loop {
            let started = Instant::now();
            let polled = tokio::select! {
                _ = self.cancel.cancelled() => break,
                polled = self.poll_notifications() => polled,
            };

            match polled {
                Ok(true) => match self.fetch().await {
                    Ok(changed_keys) if !changed_keys.is_empty() => self.dispatch(ApolloChangeEvent {
                        namespace: self.config.namespace.clone(),
                        changed_keys,
                    }),
                    Ok(_) => debug!("Apollo 配置发布后内容未变化"),
                    Err(e) => warn!("拉取 Apollo 配置失败: {}", e),
                },
                Ok(false) => {}
                Err(e) => warn!("Apollo 长轮询失败: {}", e),
            }

            let elapsed = started.elapsed();
            if elapsed < self.config.min_poll_interval {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.min_poll_interval - elapsed) => {}
                }
            }
        }
        debug!("Apollo 长轮询结束");
    }

    fn dispatch(&self, event: ApolloChangeEvent) {
        info!("Apollo 配置已更新: {:?}", event.changed_keys);
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler(&event);
        }
    }

    async fn write_backup(&self, configurations: &HashMap<String, String>) {
        let path = self.config.backup_file();
        let result = async {
            let content = serde_json::to_vec_pretty(configurations)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            tokio::fs::create_dir_all(&self.config.cache_dir).await?;
            tokio::fs::write(&path, content).await
        }
        .await;
        if let Err(e) = result {
            error!("写入 Apollo 本地备份失败: {}, 原因: {}", path.display(), e);
        }
    }

    async fn restore_backup(&self) -> DataSourceResult<()> {
        let content = tokio::fs::read(self.config.backup_file()).await?;
        let configurations: HashMap<String, String> = serde_json::from_slice(&content)
            .map_err(|e| DataSourceError::backend(format!("Apollo 本地备份损坏: {}", e)))?;
        warn!("Apollo 配置中心不可用, 使用本地备份: {}", self.config.backup_file().display());
        *self.configurations.write() = configurations;
        Ok(())
    }
}

fn http_error(url: &str, e: reqwest::Error) -> DataSourceError {
    DataSourceError::Http {
        url: url.to_string(),
        message: e.to_string(),
    }
}

/// Apollo 配置数据源
///
/// 读取命名空间中的单个配置项作为完整配置内容，配置中心的发布回调转换为变更信号。
pub struct ApolloDataSource {
    client: Arc<ApolloClient>,
    key: String,
    changed: Arc<ChangeChannel>,
}

impl std::fmt::Debug for ApolloDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApolloDataSource")
            .field("client", &self.client)
            .field("key", &self.key)
            .finish()
    }
}

impl ApolloDataSource {
    /// 基于已创建的客户端创建数据源并启动客户端
    pub async fn new(client: Arc<ApolloClient>, key: impl Into<String>) -> DataSourceResult<Self> {
        let key = key.into();
        let changed = Arc::new(ChangeChannel::new());

        let signal = Arc::clone(&changed);
        let watched_key = key.clone();
        client.on_update(move |event| {
            if event.changed_keys.iter().any(|k| *k == watched_key) {
                signal.notify();
            }
        });
        client.start().await?;

        Ok(Self { client, key, changed })
    }

    /// 由配置地址创建
    ///
    /// 地址格式：`apollo://host:port?appId=&cluster=&namespaceName=&key=&cacheDir=&insecureSkipVerify=`
    pub async fn from_addr(addr: &DataSourceAddr) -> DataSourceResult<Self> {
        let meta_addr = addr
            .host_port()
            .ok_or_else(|| DataSourceError::invalid_address(addr.as_str(), "缺少配置中心地址"))?;
        let app_id = addr
            .query("appId")
            .ok_or_else(|| DataSourceError::invalid_address(addr.as_str(), "缺少 appId"))?;
        let key = addr
            .query("key")
            .ok_or_else(|| DataSourceError::invalid_address(addr.as_str(), "缺少 key"))?;
        if addr.query("accesskeySecret").is_some() {
            warn!("Apollo 访问密钥签名暂不支持, 已忽略 accesskeySecret");
        }

        let mut config = ApolloConfig {
            meta_addr,
            app_id: app_id.to_string(),
            insecure_skip_verify: addr.query_bool("insecureSkipVerify", true),
            ..ApolloConfig::default()
        };
        if let Some(cluster) = addr.query("cluster") {
            config.cluster = cluster.to_string();
        }
        if let Some(namespace) = addr.query("namespaceName") {
            config.namespace = namespace.to_string();
        }
        if let Some(cache_dir) = addr.query("cacheDir") {
            config.cache_dir = PathBuf::from(cache_dir);
        }

        Self::new(Arc::new(ApolloClient::new(config)?), key).await
    }
}

#[async_trait]
impl DataSource for ApolloDataSource {
    async fn read_config(&self) -> DataSourceResult<Vec<u8>> {
        Ok(self.client.get_string(&self.key).unwrap_or_default().into_bytes())
    }

    fn is_config_changed(&self) -> Option<ChangeSignal> {
        self.changed.take_signal()
    }

    async fn close(&self) -> DataSourceResult<()> {
        self.client.stop();
        self.changed.close();
        Ok(())
    }

    fn name(&self) -> &str {
        super::SCHEME_APOLLO
    }
}

impl Drop for ApolloDataSource {
    fn drop(&mut self) {
        self.client.stop();
    }
}
