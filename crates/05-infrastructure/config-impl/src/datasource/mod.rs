//! 配置数据源工厂
//!
//! 配置地址按 URL 解析，scheme 决定使用哪个数据源构造器。同一地址在一个工厂表内只创建一个实例。

pub mod apollo;
pub mod etcd;
pub mod file;
pub mod http;

pub use apollo::{ApolloClient, ApolloConfig, ApolloDataSource};
pub use etcd::EtcdDataSource;
pub use file::FileDataSource;
pub use http::HttpDataSource;

use config_abstractions::DataSource;
use futures::future::BoxFuture;
use infrastructure_common::{DataSourceError, DataSourceResult};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// 文件数据源 scheme
pub const SCHEME_FILE: &str = "file";
/// HTTP 数据源 scheme
pub const SCHEME_HTTP: &str = "http";
/// HTTPS 数据源 scheme
pub const SCHEME_HTTPS: &str = "https";
/// 协调存储数据源 scheme
pub const SCHEME_ETCDV3: &str = "etcdv3";
/// Apollo 数据源 scheme
pub const SCHEME_APOLLO: &str = "apollo";

/// 解析后的配置地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceAddr {
    raw: String,
    scheme: String,
    url: Option<Url>,
    path: Option<PathBuf>,
    query: Vec<(String, String)>,
}

impl DataSourceAddr {
    /// 解析配置地址
    ///
    /// 空地址返回 [`DataSourceError::ConfigAddrEmpty`]；没有 scheme 的地址按文件路径处理。
    pub fn parse(addr: &str) -> DataSourceResult<Self> {
        let raw = addr.trim();
        if raw.is_empty() {
            return Err(DataSourceError::ConfigAddrEmpty);
        }

        match Url::parse(raw) {
            // 单字母 scheme 是 Windows 盘符
            Ok(url) if url.scheme().len() > 1 => {
                let scheme = url.scheme().to_ascii_lowercase();
                let query = url
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                let path = (scheme == SCHEME_FILE).then(|| {
                    url.to_file_path()
                        .unwrap_or_else(|_| PathBuf::from(url.path()))
                });
                Ok(Self {
                    raw: raw.to_string(),
                    scheme,
                    url: Some(url),
                    path,
                    query,
                })
            }
            Ok(_) | Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Self::file_path(raw)),
            Err(e) => Err(DataSourceError::invalid_address(raw, e.to_string())),
        }
    }

    fn file_path(raw: &str) -> Self {
        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, query),
            None => (raw, ""),
        };
        Self {
            raw: raw.to_string(),
            scheme: SCHEME_FILE.to_string(),
            url: None,
            path: Some(PathBuf::from(path)),
            query: url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    /// 原始地址
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// 解析后的 URL，文件路径形式的地址没有 URL
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// 文件路径，仅文件数据源有值
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// `host:port` 形式的主机地址
    pub fn host_port(&self) -> Option<String> {
        let url = self.url.as_ref()?;
        let host = url.host_str()?;
        Some(match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// 查询参数
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// 布尔查询参数，无法识别时使用默认值
    pub fn query_bool(&self, name: &str, default: bool) -> bool {
        match self.query(name).map(str::to_ascii_lowercase).as_deref() {
            Some("1" | "t" | "true" | "yes" | "on") => true,
            Some("0" | "f" | "false" | "no" | "off") => false,
            _ => default,
        }
    }
}

/// 数据源构造结果
pub type DataSourceFuture = BoxFuture<'static, DataSourceResult<Arc<dyn DataSource>>>;

/// 数据源构造器
pub type DataSourceCreator = Arc<dyn Fn(DataSourceAddr) -> DataSourceFuture + Send + Sync>;

/// scheme 到数据源构造器的注册表
pub struct DataSourceRegistry {
    creators: RwLock<HashMap<String, DataSourceCreator>>,
    instances: tokio::sync::Mutex<HashMap<String, Arc<dyn DataSource>>>,
}

impl std::fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

impl Default for DataSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSourceRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            creators: RwLock::new(HashMap::new()),
            instances: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// 创建包含内置数据源的注册表
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(SCHEME_FILE, |addr: DataSourceAddr| async move {
            let ds: Arc<dyn DataSource> = Arc::new(FileDataSource::from_addr(&addr)?);
            Ok(ds)
        });
        for scheme in [SCHEME_HTTP, SCHEME_HTTPS] {
            registry.register(scheme, |addr: DataSourceAddr| async move {
                let ds: Arc<dyn DataSource> = Arc::new(HttpDataSource::from_addr(&addr)?);
                Ok(ds)
            });
        }
        registry.register(SCHEME_APOLLO, |addr: DataSourceAddr| async move {
            let ds: Arc<dyn DataSource> = Arc::new(ApolloDataSource::from_addr(&addr).await?);
            Ok(ds)
        });
        #[cfg(feature = "etcd")]
        registry.register(SCHEME_ETCDV3, |addr: DataSourceAddr| async move {
            let ds: Arc<dyn DataSource> = Arc::new(EtcdDataSource::from_addr(&addr).await?);
            Ok(ds)
        });
        registry
    }

    /// 注册数据源构造器，同一 scheme 重复注册时覆盖旧的构造器
    pub fn register<F, Fut>(&self, scheme: impl Into<String>, creator: F)
    where
        F: Fn(DataSourceAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DataSourceResult<Arc<dyn DataSource>>> + Send + 'static,
    {
        let scheme = scheme.into();
        debug!("注册配置数据源: {}", scheme);
        let creator: DataSourceCreator =
            Arc::new(move |addr: DataSourceAddr| -> DataSourceFuture { Box::pin(creator(addr)) });
        if self.creators.write().insert(scheme.clone(), creator).is_some() {
            warn!("配置数据源构造器被覆盖: {}", scheme);
        }
    }

    /// 已注册的 scheme
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.creators.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// 按地址创建数据源，同一地址返回同一实例
    pub async fn new_data_source(&self, addr: &str) -> DataSourceResult<Arc<dyn DataSource>> {
        let parsed = DataSourceAddr::parse(addr)?;
        let creator = self
            .creators
            .read()
            .get(parsed.scheme())
            .cloned()
            .ok_or_else(|| DataSourceError::InvalidDataSource {
                scheme: parsed.scheme().to_string(),
            })?;

        let mut instances = self.instances.lock().await;
        if let Some(existing) = instances.get(parsed.as_str()) {
            return Ok(Arc::clone(existing));
        }

        let key = parsed.as_str().to_string();
        let ds = creator(parsed).await?;
        info!("创建配置数据源: {} ({})", key, ds.name());
        instances.insert(key, Arc::clone(&ds));
        Ok(ds)
    }

    /// 关闭并移除所有已创建的数据源
    pub async fn close_all(&self) {
        let instances: Vec<(String, Arc<dyn DataSource>)> =
            self.instances.lock().await.drain().collect();
        for (addr, ds) in instances {
            if let Err(e) = ds.close().await {
                warn!("关闭配置数据源失败: {}, 原因: {}", addr, e);
            }
        }
    }
}

static DEFAULT_DATA_SOURCES: Lazy<DataSourceRegistry> = Lazy::new(DataSourceRegistry::with_defaults);

/// 进程级默认的数据源注册表
pub fn default_data_sources() -> &'static DataSourceRegistry {
    &DEFAULT_DATA_SOURCES
}

/// 使用默认注册表按地址创建数据源
pub async fn new_data_source(addr: &str) -> DataSourceResult<Arc<dyn DataSource>> {
    default_data_sources().new_data_source(addr).await
}

/// 把地址转换为可用作文件名的缓存键
pub(crate) fn cache_key(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}
