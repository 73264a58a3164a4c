//! 注册中心构建器
//!
//! 注册中心实例在配置 `ox.registry` 下按名称声明：
//!
//! ```toml
//! [ox.registry.main]
//! kind = "etcdv3"
//! configKey = "ox.registry.main"
//! delaySeconds = 0
//! ```
//!
//! `kind` 决定使用哪个构建函数，缺省为 `etcdv3`。

use crate::local::LocalRegistry;
use config_abstractions::GetOptions;
use config_impl::Configuration;
use futures::future::BoxFuture;
use infrastructure_common::{RegistryError, RegistryResult};
use parking_lot::RwLock;
use registry_abstractions::Registry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 注册中心声明所在的配置键
pub const REGISTRY_CONFIG_KEY: &str = "ox.registry";
/// etcd v3 注册中心类型
pub const KIND_ETCDV3: &str = "etcdv3";
/// 本地注册中心类型
pub const KIND_LOCAL: &str = "local";

fn default_kind() -> String {
    KIND_ETCDV3.to_string()
}

/// 单个注册中心的声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryItem {
    /// 注册中心类型
    #[serde(default = "default_kind")]
    pub kind: String,
    /// 注册中心配置所在的键，为空时使用 `ox.registry.<name>`
    #[serde(alias = "configKey")]
    pub config_key: String,
    /// 延迟注册的秒数
    #[serde(alias = "delaySeconds", alias = "deplaySeconds", alias = "deplay_seconds")]
    pub delay_seconds: u64,
}

impl Default for RegistryItem {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            config_key: String::new(),
            delay_seconds: 0,
        }
    }
}

impl RegistryItem {
    /// 注册中心配置所在的键
    pub fn config_key_for(&self, name: &str) -> String {
        if self.config_key.is_empty() {
            format!("{}.{}", REGISTRY_CONFIG_KEY, name)
        } else {
            self.config_key.clone()
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

/// 按配置构建出的注册中心
#[derive(Debug, Clone)]
pub struct NamedRegistry {
    pub name: String,
    pub item: RegistryItem,
    pub registry: Arc<dyn Registry>,
}

/// 构建结果
pub type RegistryFuture = BoxFuture<'static, RegistryResult<Arc<dyn Registry>>>;

/// 注册中心构建函数，参数为配置树、注册中心名称与声明
pub type RegistryBuilder = Arc<dyn Fn(Configuration, String, RegistryItem) -> RegistryFuture + Send + Sync>;

/// 注册中心类型到构建函数的映射表
pub struct RegistryBuilders {
    builders: RwLock<HashMap<String, RegistryBuilder>>,
}

impl std::fmt::Debug for RegistryBuilders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilders").field("kinds", &self.kinds()).finish()
    }
}

impl Default for RegistryBuilders {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilders {
    /// 创建空的映射表
    pub fn new() -> Self {
        Self {
            builders: RwLock::new(HashMap::new()),
        }
    }

    /// 创建包含内置类型的映射表
    pub fn with_defaults() -> Self {
        let builders = Self::new();
        let local = builders.register(KIND_LOCAL, |_config: Configuration, _name: String, _item: RegistryItem| async move {
            let registry: Arc<dyn Registry> = Arc::new(LocalRegistry::new());
            Ok(registry)
        });
        if let Err(e) = local {
            warn!("注册内置注册中心失败: {}", e);
        }

        #[cfg(feature = "etcd")]
        {
            let etcd = builders.register(KIND_ETCDV3, |config: Configuration, name: String, item: RegistryItem| async move {
                let registry_config = crate::RegistryConfig::raw(&config, &item.config_key_for(&name))?;
                let registry: Arc<dyn Registry> = Arc::new(crate::EtcdV3Registry::connect(registry_config).await?);
                Ok(registry)
            });
            if let Err(e) = etcd {
                warn!("注册内置注册中心失败: {}", e);
            }
        }
        builders
    }

    /// 注册构建函数，同一类型只能注册一次
    pub fn register<F, Fut>(&self, kind: impl Into<String>, build: F) -> RegistryResult<()>
    where
        F: Fn(Configuration, String, RegistryItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RegistryResult<Arc<dyn Registry>>> + Send + 'static,
    {
        let kind = kind.into();
        let mut builders = self.builders.write();
        if builders.contains_key(&kind) {
            return Err(RegistryError::DuplicateKind { kind });
        }
        debug!("注册注册中心构建器: {}", kind);
        let builder: RegistryBuilder = Arc::new(move |config: Configuration, name: String, item: RegistryItem| -> RegistryFuture {
            Box::pin(build(config, name, item))
        });
        builders.insert(kind, builder);
        Ok(())
    }

    /// 已注册的类型
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.builders.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// 构建单个注册中心
    pub async fn build(&self, config: &Configuration, name: &str, item: RegistryItem) -> RegistryResult<Arc<dyn Registry>> {
        let builder = self
            .builders
            .read()
            .get(&item.kind)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownKind { kind: item.kind.clone() })?;
        builder(config.clone(), name.to_string(), item).await
    }

    /// 按 `ox.registry` 下的声明构建所有注册中心，结果按名称排序
    ///
    /// 未声明时返回空列表；未知类型记录日志后跳过。
    pub async fn build_from_config(&self, config: &Configuration) -> RegistryResult<Vec<NamedRegistry>> {
        if !config.exists(REGISTRY_CONFIG_KEY) {
            debug!("未声明注册中心: {}", REGISTRY_CONFIG_KEY);
            return Ok(Vec::new());
        }
        let items: BTreeMap<String, RegistryItem> = config.unmarshal_key(REGISTRY_CONFIG_KEY, &GetOptions::default())?;

        let mut registries = Vec::with_capacity(items.len());
        for (name, item) in items {
            match self.build(config, &name, item.clone()).await {
                Ok(registry) => {
                    info!("构建注册中心: {}, 类型 {}, 配置 {}", name, item.kind, item.config_key_for(&name));
                    registries.push(NamedRegistry { name, item, registry });
                }
                Err(RegistryError::UnknownKind { kind }) => {
                    warn!("未知的注册中心类型: {}, 跳过 {}", kind, name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(registries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EtcdV3Registry, RegistryConfig};
    use config_abstractions::ConfigFormat;
    use coordination_store::MemoryStore;

    fn memory_builders() -> RegistryBuilders {
        let builders = RegistryBuilders::with_defaults();
        builders
            .register("memory", |config: Configuration, name: String, item: RegistryItem| async move {
                let registry_config = RegistryConfig::raw(&config, &item.config_key_for(&name))?;
                let registry: Arc<dyn Registry> =
                    Arc::new(EtcdV3Registry::new(Arc::new(MemoryStore::new()), registry_config));
                Ok(registry)
            })
            .unwrap();
        builders
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let builders = memory_builders();
        let result = builders.register(KIND_LOCAL, |_c: Configuration, _n: String, _i: RegistryItem| async move {
            let registry: Arc<dyn Registry> = Arc::new(LocalRegistry::new());
            Ok(registry)
        });
        assert!(matches!(result, Err(RegistryError::DuplicateKind { kind }) if kind == KIND_LOCAL));
        assert!(builders.kinds().contains(&"memory".to_string()));
    }

    #[tokio::test]
    async fn test_build_from_config() {
        let config = Configuration::new();
        config
            .load(
                br#"
                [ox.registry.alpha]
                kind = "memory"
                prefix = "demo"
                serviceTTL = "5s"

                [ox.registry.beta]
                kind = "local"
                delaySeconds = 2

                [ox.registry.gamma]
                kind = "consul"
                "#,
                &ConfigFormat::Toml,
            )
            .unwrap();

        let registries = memory_builders().build_from_config(&config).await.unwrap();
        let names: Vec<&str> = registries.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"], "未知类型应被跳过");
        assert_eq!(registries[0].registry.kind(), "etcdv3");
        assert_eq!(registries[1].registry.kind(), "local");
        assert_eq!(registries[1].item.delay(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_missing_kind_defaults_to_etcdv3() {
        let config = Configuration::new();
        config.load(b"[ox.registry.main]\nprefix = \"x\"\n", &ConfigFormat::Toml).unwrap();
        let items: BTreeMap<String, RegistryItem> =
            config.unmarshal_key(REGISTRY_CONFIG_KEY, &GetOptions::default()).unwrap();
        assert_eq!(items["main"].kind, KIND_ETCDV3);
        assert_eq!(items["main"].config_key_for("main"), "ox.registry.main");
    }

    #[tokio::test]
    async fn test_no_declaration() {
        let config = Configuration::new();
        config.load(b"[app]\nname = \"demo\"\n", &ConfigFormat::Toml).unwrap();
        let registries = RegistryBuilders::with_defaults().build_from_config(&config).await.unwrap();
        assert!(registries.is_empty());
    }
}
