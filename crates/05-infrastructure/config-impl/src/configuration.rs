//! 配置树实现

use crate::cast;
use crate::merge::{deep_search, flatten, merge_maps, nested_from_path};
use config_abstractions::{normalize_keys, ConfigChanges, DataSource, GetOptions, Unmarshal};
use dashmap::DashMap;
use infrastructure_common::{ConfigError, ConfigResult};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 默认键分隔符
pub const DEFAULT_KEY_DELIM: &str = ".";

/// 配置变更回调
pub type ChangeHandler = Arc<dyn Fn(&Configuration, &ConfigChanges) + Send + Sync>;

/// 配置加载完成回调
pub type LoadedHandler = Arc<dyn Fn(&Configuration) + Send + Sync>;

struct Inner {
    key_delim: String,
    overrides: RwLock<Map<String, Value>>,
    key_map: DashMap<String, Value>,
    on_changes: RwLock<Vec<ChangeHandler>>,
    on_loadeds: Mutex<Vec<LoadedHandler>>,
    watchers: RwLock<HashMap<String, Vec<ChangeHandler>>>,
    loaded: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// 配置树
///
/// 嵌套的键值映射由读写锁保护，扁平化缓存使用并发映射，读多写少的场景下读取无需等待写锁。
/// 克隆得到的是同一棵配置树的句柄。
#[derive(Clone)]
pub struct Configuration {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("key_delim", &self.inner.key_delim)
            .field("loaded", &self.is_loaded())
            .field("cached_keys", &self.inner.key_map.len())
            .field("on_changes_count", &self.inner.on_changes.read().len())
            .field("watched_prefixes", &self.inner.watchers.read().len())
            .finish()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration {
    /// 创建空的配置树
    pub fn new() -> Self {
        Self::with_key_delim(DEFAULT_KEY_DELIM)
    }

    /// 使用指定的键分隔符创建配置树
    pub fn with_key_delim(delim: impl Into<String>) -> Self {
        let mut key_delim = delim.into();
        if key_delim.is_empty() {
            key_delim = DEFAULT_KEY_DELIM.to_string();
        }
        Self {
            inner: Arc::new(Inner {
                key_delim,
                overrides: RwLock::new(Map::new()),
                key_map: DashMap::new(),
                on_changes: RwLock::new(Vec::new()),
                on_loadeds: Mutex::new(Vec::new()),
                watchers: RwLock::new(HashMap::new()),
                loaded: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 键分隔符
    pub fn key_delim(&self) -> &str {
        &self.inner.key_delim
    }

    /// 是否已完成首次加载
    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.load(Ordering::Acquire)
    }

    /// 加载配置内容
    ///
    /// 解析失败直接返回错误；首次成功加载后触发加载完成回调，且只触发一次。
    pub fn load(&self, content: &[u8], unmarshal: &dyn Unmarshal) -> ConfigResult<()> {
        self.reflush(content, unmarshal)?;
        info!("配置加载成功");

        let pending = {
            let mut on_loadeds = self.inner.on_loadeds.lock();
            if self.inner.loaded.swap(true, Ordering::AcqRel) {
                Vec::new()
            } else {
                std::mem::take(&mut *on_loadeds)
            }
        };
        for handler in pending {
            handler(self);
        }
        Ok(())
    }

    /// 从读取器加载配置
    pub fn load_from_reader<R: Read>(&self, mut reader: R, unmarshal: &dyn Unmarshal) -> ConfigResult<()> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        self.load(&content, unmarshal)
    }

    /// 从数据源加载配置
    ///
    /// 首次读取与解析的错误会返回给调用方；之后每次收到变更信号都会重新读取并应用，
    /// 期间的失败只记录日志并保留原有配置。后台任务在 [`Configuration::close`] 或数据源关闭后退出。
    pub async fn load_from_data_source<U>(&self, ds: Arc<dyn DataSource>, unmarshal: U) -> ConfigResult<()>
    where
        U: Unmarshal + 'static,
    {
        let content = ds.read_config().await?;
        self.load(&content, &unmarshal)?;

        let Some(mut signal) = ds.is_config_changed() else {
            debug!("数据源不支持动态变更: {}", ds.name());
            return Ok(());
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.child_token();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = signal.changed() => {
                        if changed.is_none() {
                            debug!("数据源变更信号已结束: {}", ds.name());
                            break;
                        }
                    }
                }

                let Some(inner) = weak.upgrade() else { break };
                let config = Configuration { inner };
                match ds.read_config().await {
                    Ok(content) => {
                        if let Err(e) = config.reflush(&content, &unmarshal) {
                            warn!("刷新配置失败, 保留当前配置: {}", e);
                        } else {
                            debug!("配置已从数据源刷新: {}", ds.name());
                        }
                    }
                    Err(e) => warn!("读取数据源失败, 保留当前配置: {}", e),
                }
            }
        });
        self.inner.tasks.lock().push(handle);
        Ok(())
    }

    fn reflush(&self, content: &[u8], unmarshal: &dyn Unmarshal) -> ConfigResult<ConfigChanges> {
        let parsed = unmarshal.unmarshal(content)?;
        self.apply(parsed)
    }

    /// 把映射合并进配置树，并通知产生的差异
    ///
    /// 回调在锁释放之后执行，回调内的读取能观察到刚应用的值。
    pub fn apply(&self, conf: Map<String, Value>) -> ConfigResult<ConfigChanges> {
        let mut changes = ConfigChanges::new();
        {
            let mut overrides = self.inner.overrides.write();
            merge_maps(&mut overrides, conf);

            let flat = flatten(&overrides, &self.inner.key_delim);
            let loaded = self.is_loaded();
            for (key, value) in &flat {
                match self.inner.key_map.insert(key.clone(), value.clone()) {
                    Some(previous) if previous != *value => changes.insert(key.clone(), value.clone()),
                    None if loaded => changes.insert(key.clone(), value.clone()),
                    _ => {}
                }
            }
            self.inner.key_map.retain(|key, _| flat.contains_key(key));
        }

        self.notify_changes(&changes);
        Ok(changes)
    }

    fn notify_changes(&self, changes: &ConfigChanges) {
        if changes.is_empty() {
            return;
        }
        debug!("配置发生变更: {:?}", changes.keys().collect::<Vec<_>>());

        let handlers = self.inner.on_changes.read().clone();
        for handler in &handlers {
            handler(self, changes);
        }

        let delim = self.inner.key_delim.clone();
        let matched: Vec<(ConfigChanges, Vec<ChangeHandler>)> = self
            .inner
            .watchers
            .read()
            .iter()
            .filter_map(|(prefix, handlers)| {
                let scoped = changes.under_prefix(prefix, &delim);
                (!scoped.is_empty()).then(|| (scoped, handlers.clone()))
            })
            .collect();

        for (scoped, handlers) in matched {
            let scoped = Arc::new(scoped);
            for handler in handlers {
                let config = self.clone();
                let scoped = Arc::clone(&scoped);
                spawn_handler(move || handler(&config, &scoped));
            }
        }
    }

    /// 设置配置项，经由与加载相同的差异通知流程
    pub fn set(&self, key: &str, value: impl Into<Value>) -> ConfigResult<()> {
        let paths = self.split_key(key)?;
        self.apply(nested_from_path(&paths, value.into()))?;
        Ok(())
    }

    fn split_key<'a>(&self, key: &'a str) -> ConfigResult<Vec<&'a str>> {
        if key.is_empty() {
            return Err(ConfigError::InvalidKey { key: key.to_string() });
        }
        Ok(key.split(self.inner.key_delim.as_str()).collect())
    }

    /// 获取配置值
    pub fn get(&self, key: &str) -> Option<Value> {
        self.find(key).filter(|value| !value.is_null())
    }

    fn find(&self, key: &str) -> Option<Value> {
        if let Some(cached) = self.inner.key_map.get(key) {
            return Some(cached.value().clone());
        }
        if key.is_empty() {
            return None;
        }

        let paths: Vec<&str> = key.split(self.inner.key_delim.as_str()).collect();
        let overrides = self.inner.overrides.read();
        let found = deep_search(&overrides, &paths)?.clone();
        // 持有读锁时写入缓存，避免与并发的 apply 交错写入旧值
        self.inner.key_map.insert(key.to_string(), found.clone());
        Some(found)
    }

    /// 配置项是否存在
    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key).and_then(|v| cast::to_string(&v)).unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(|v| cast::to_bool(&v)).unwrap_or_default()
    }

    pub fn get_int(&self, key: &str) -> i32 {
        self.get(key)
            .and_then(|v| cast::to_i64(&v))
            .and_then(|i| i32::try_from(i).ok())
            .unwrap_or_default()
    }

    pub fn get_int64(&self, key: &str) -> i64 {
        self.get(key).and_then(|v| cast::to_i64(&v)).unwrap_or_default()
    }

    pub fn get_float64(&self, key: &str) -> f64 {
        self.get(key).and_then(|v| cast::to_f64(&v)).unwrap_or_default()
    }

    pub fn get_time(&self, key: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.get(key).and_then(|v| cast::to_time(&v))
    }

    pub fn get_duration(&self, key: &str) -> Duration {
        self.get(key).and_then(|v| cast::to_duration(&v)).unwrap_or_default()
    }

    pub fn get_string_slice(&self, key: &str) -> Vec<String> {
        self.get(key).and_then(|v| cast::to_string_slice(&v)).unwrap_or_default()
    }

    pub fn get_slice(&self, key: &str) -> Vec<Value> {
        self.get(key).and_then(|v| cast::to_slice(&v)).unwrap_or_default()
    }

    pub fn get_string_map(&self, key: &str) -> Map<String, Value> {
        self.get(key).and_then(|v| cast::to_string_map(&v)).unwrap_or_default()
    }

    pub fn get_string_map_string(&self, key: &str) -> HashMap<String, String> {
        self.get(key).and_then(|v| cast::to_string_map_string(&v)).unwrap_or_default()
    }

    pub fn get_slice_string_map(&self, key: &str) -> Vec<Map<String, Value>> {
        self.get(key).and_then(|v| cast::to_slice_string_map(&v)).unwrap_or_default()
    }

    pub fn get_string_map_string_slice(&self, key: &str) -> HashMap<String, Vec<String>> {
        self.get(key)
            .and_then(|v| cast::to_string_map_string_slice(&v))
            .unwrap_or_default()
    }

    /// 把配置项解码为结构化类型
    ///
    /// 空键解码整棵配置树；键不存在时返回 [`ConfigError::InvalidKey`]。
    pub fn unmarshal_key<T: DeserializeOwned>(&self, key: &str, options: &GetOptions) -> ConfigResult<T> {
        let qualified = options.qualify(key, &self.inner.key_delim);
        let value = if qualified.is_empty() {
            Value::Object(self.inner.overrides.read().clone())
        } else {
            self.get(&qualified)
                .ok_or_else(|| ConfigError::InvalidKey { key: qualified.clone() })?
        };

        serde_json::from_value(normalize_keys(value, options.key_style()))
            .map_err(|source| ConfigError::DecodeError { key: qualified, source })
    }

    /// 解码配置项，失败时返回 `expect`
    pub fn unmarshal_with_expect<T: DeserializeOwned>(&self, key: &str, expect: T) -> T {
        self.unmarshal_key(key, &GetOptions::default()).unwrap_or(expect)
    }

    /// 以 `key` 处的子树创建一份独立的配置快照，不跟随后续变更
    pub fn sub(&self, key: &str) -> Configuration {
        let sub = Configuration::with_key_delim(self.inner.key_delim.clone());
        let subtree = self.get_string_map(key);
        if let Err(e) = sub.apply(subtree) {
            warn!("创建子配置失败: {}, 原因: {}", key, e);
        }
        sub
    }

    /// 注册配置变更回调，回调收到本次应用的全部差异
    pub fn on_change<F>(&self, handler: F)
    where
        F: Fn(&Configuration, &ConfigChanges) + Send + Sync + 'static,
    {
        self.inner.on_changes.write().push(Arc::new(handler));
    }

    /// 注册加载完成回调，已加载时立即执行
    pub fn on_loaded<F>(&self, handler: F)
    where
        F: Fn(&Configuration) + Send + Sync + 'static,
    {
        {
            let mut on_loadeds = self.inner.on_loadeds.lock();
            if !self.is_loaded() {
                on_loadeds.push(Arc::new(handler));
                return;
            }
        }
        handler(self);
    }

    /// 监听前缀下的配置变更
    ///
    /// 每个匹配的回调作为独立的并发任务执行，只收到该前缀下的差异，不保证不同前缀之间的执行顺序。
    pub fn watch<F>(&self, prefix: impl Into<String>, handler: F)
    where
        F: Fn(&Configuration, &ConfigChanges) + Send + Sync + 'static,
    {
        self.inner
            .watchers
            .write()
            .entry(prefix.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// 加载环境变量
    ///
    /// 带前缀的环境变量 `APP_FOO_BAR=v` 转换为键 `app.foo.bar`。
    pub fn load_environments(&self, prefix: &str) -> ConfigResult<()> {
        let mut conf = Map::new();
        for (name, value) in std::env::vars() {
            if !name.starts_with(prefix) {
                continue;
            }
            let key = name.to_lowercase().replace('_', &self.inner.key_delim);
            let paths: Vec<&str> = key
                .split(self.inner.key_delim.as_str())
                .filter(|p| !p.is_empty())
                .collect();
            if paths.is_empty() {
                continue;
            }
            merge_maps(&mut conf, nested_from_path(&paths, Value::String(value)));
        }
        if conf.is_empty() {
            return Ok(());
        }
        self.apply(conf)?;
        Ok(())
    }

    /// 扁平化视图
    pub fn traverse(&self, sep: &str) -> BTreeMap<String, Value> {
        flatten(&self.inner.overrides.read(), sep)
    }

    /// 以调试级别输出扁平化视图
    pub fn debug_dump(&self, sep: &str) {
        for (key, value) in self.traverse(sep) {
            debug!(key = %key, value = %value, "配置项");
        }
    }

    /// 停止所有后台刷新任务
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("配置刷新任务异常退出: {}", e);
                }
            }
        }
    }
}

fn spawn_handler<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(task);
        }
        Err(_) => {
            std::thread::spawn(task);
        }
    }
}
