//! HTTP 配置数据源

use super::{cache_key, DataSourceAddr};
use async_trait::async_trait;
use config_abstractions::{ChangeChannel, ChangeSignal, DataSource};
use infrastructure_common::{duration::parse_duration, DataSourceError, DataSourceResult};
use parking_lot::Mutex;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// 数据源自身使用、不转发给服务端的查询参数
const OWN_PARAMS: [&str; 3] = ["watch", "pollInterval", "cacheDir"];

#[derive(Debug, Default)]
struct PollState {
    etag: Option<String>,
    body: Option<Vec<u8>>,
}

struct Shared {
    url: String,
    client: reqwest::Client,
    cache_dir: PathBuf,
    cache_key: String,
    state: Mutex<PollState>,
}

enum Fetched {
    Body(Vec<u8>),
    NotModified,
}

impl Shared {
    async fn fetch(&self, conditional: bool) -> DataSourceResult<Fetched> {
        let mut request = self.client.get(&self.url);
        if conditional {
            if let Some(etag) = self.state.lock().etag.clone() {
                request = request.header(IF_NONE_MATCH, etag);
            }
        }

        let response = request.send().await.map_err(|e| self.http_error(e.to_string()))?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        if !response.status().is_success() {
            return Err(self.http_error(format!("状态码 {}", response.status())));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| self.http_error(e.to_string()))?
            .to_vec();

        self.state.lock().etag = etag;
        Ok(Fetched::Body(body))
    }

    /// 记录最新内容，返回内容是否发生变化
    fn remember(&self, body: &[u8]) -> bool {
        let mut state = self.state.lock();
        let changed = state.body.as_deref() != Some(body);
        if changed {
            state.body = Some(body.to_vec());
        }
        changed
    }

    fn http_error(&self, message: String) -> DataSourceError {
        DataSourceError::Http {
            url: self.url.clone(),
            message,
        }
    }

    fn cache_file(&self) -> PathBuf {
        cache_file_name(&self.cache_key, &self.cache_dir)
    }

    async fn write_cache(&self, body: &[u8]) {
        if let Err(e) = write_config_to_file(&self.cache_key, &self.cache_dir, body).await {
            error!("写入配置缓存失败: {}, 原因: {}", self.cache_file().display(), e);
        }
    }
}

/// 缓存文件路径
pub fn cache_file_name(cache_key: &str, cache_dir: &Path) -> PathBuf {
    cache_dir.join(cache_key)
}

/// 写入配置缓存文件
pub async fn write_config_to_file(cache_key: &str, cache_dir: &Path, content: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(cache_dir).await?;
    tokio::fs::write(cache_file_name(cache_key, cache_dir), content).await
}

/// 读取配置缓存文件
pub async fn read_config_from_file(cache_key: &str, cache_dir: &Path) -> std::io::Result<Vec<u8>> {
    tokio::fs::read(cache_file_name(cache_key, cache_dir)).await
}

/// HTTP 配置数据源
///
/// 每次成功读取都会写入本地缓存，服务端不可用时回退到缓存内容。
/// 开启 `watch` 后按 `pollInterval` 轮询，使用 `ETag` 做条件请求，内容变化时发出变更信号。
pub struct HttpDataSource {
    shared: Arc<Shared>,
    changed: Arc<ChangeChannel>,
    cancel: CancellationToken,
    watching: bool,
}

impl std::fmt::Debug for HttpDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDataSource")
            .field("url", &self.shared.url)
            .field("cache_dir", &self.shared.cache_dir)
            .field("watching", &self.watching)
            .finish()
    }
}

impl HttpDataSource {
    /// 创建新的 HTTP 数据源，开启轮询时必须在 tokio 运行时内调用
    pub fn new(url: impl Into<String>, cache_dir: impl Into<PathBuf>, poll_interval: Option<Duration>) -> DataSourceResult<Self> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DataSourceError::backend(format!("创建 HTTP 客户端失败: {}", e)))?;

        let ds = Self {
            shared: Arc::new(Shared {
                cache_key: cache_key(&url),
                url,
                client,
                cache_dir: cache_dir.into(),
                state: Mutex::new(PollState::default()),
            }),
            changed: Arc::new(ChangeChannel::new()),
            cancel: CancellationToken::new(),
            watching: poll_interval.is_some(),
        };
        if let Some(interval) = poll_interval {
            ds.spawn_poller(interval);
        }
        Ok(ds)
    }

    /// 由配置地址创建
    ///
    /// 支持的参数：`watch`、`pollInterval`（默认 5s）、`cacheDir`（默认当前目录），其余参数原样转发。
    pub fn from_addr(addr: &DataSourceAddr) -> DataSourceResult<Self> {
        let url = addr
            .url()
            .ok_or_else(|| DataSourceError::invalid_address(addr.as_str(), "不是有效的 URL"))?;

        let poll_interval = if addr.query_bool("watch", false) {
            let interval = match addr.query("pollInterval") {
                Some(raw) => parse_duration(raw)
                    .map_err(|e| DataSourceError::invalid_address(addr.as_str(), e.to_string()))?,
                None => DEFAULT_POLL_INTERVAL,
            };
            Some(interval)
        } else {
            None
        };
        let cache_dir = addr.query("cacheDir").unwrap_or(".");

        Self::new(strip_own_params(url), cache_dir, poll_interval)
    }

    /// 实际请求的 URL
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    fn spawn_poller(&self, interval: Duration) {
        let shared = Arc::clone(&self.shared);
        let changed = Arc::clone(&self.changed);
        let cancel = self.cancel.clone();
        info!("开始轮询 HTTP 配置: {}, 间隔 {:?}", shared.url, interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match shared.fetch(true).await {
                    Ok(Fetched::NotModified) => debug!("HTTP 配置未变化: {}", shared.url),
                    Ok(Fetched::Body(body)) => {
                        if shared.remember(&body) {
                            shared.write_cache(&body).await;
                            changed.notify();
                        }
                    }
                    Err(e) => warn!("轮询 HTTP 配置失败: {}", e),
                }
            }
            debug!("HTTP 配置轮询结束: {}", shared.url);
        });
    }
}

fn strip_own_params(url: &Url) -> String {
    let mut stripped = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !OWN_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped.to_string()
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn read_config(&self) -> DataSourceResult<Vec<u8>> {
        match self.shared.fetch(false).await {
            Ok(Fetched::Body(body)) => {
                self.shared.remember(&body);
                self.shared.write_cache(&body).await;
                Ok(body)
            }
            Ok(Fetched::NotModified) => Err(self.shared.http_error("意外的 304 响应".to_string())),
            Err(e) => {
                match read_config_from_file(&self.shared.cache_key, &self.shared.cache_dir).await {
                    Ok(cached) => {
                        warn!("HTTP 配置不可用, 使用本地缓存: {}, 原因: {}", self.shared.cache_file().display(), e);
                        Ok(cached)
                    }
                    Err(_) => Err(e),
                }
            }
        }
    }

    fn is_config_changed(&self) -> Option<ChangeSignal> {
        if !self.watching {
            return None;
        }
        self.changed.take_signal()
    }

    async fn close(&self) -> DataSourceResult<()> {
        self.cancel.cancel();
        self.changed.close();
        Ok(())
    }

    fn name(&self) -> &str {
        super::SCHEME_HTTP
    }
}

impl Drop for HttpDataSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_own_params() {
        let url = Url::parse("http://cfg.local/app.toml?watch=true&env=prod&cacheDir=/tmp").unwrap();
        assert_eq!(strip_own_params(&url), "http://cfg.local/app.toml?env=prod");

        let url = Url::parse("https://cfg.local/app.toml?watch=1").unwrap();
        assert_eq!(strip_own_params(&url), "https://cfg.local/app.toml");
    }

    #[test]
    fn test_cache_file_name() {
        let path = cache_file_name("http___cfg.local_app.toml", Path::new("/var/cache"));
        assert_eq!(path, PathBuf::from("/var/cache/http___cfg.local_app.toml"));
    }
}
