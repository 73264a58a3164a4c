//! 注册中心配置

use config_abstractions::GetOptions;
use config_impl::Configuration;
use coordination_store::EtcdConfig;
use infrastructure_common::duration::serde_duration;
use infrastructure_common::RegistryResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// 注册中心配置
///
/// 读取 `ox.registry.<name>`，与 etcd 连接配置平铺在同一层级。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 单次读写的默认超时
    #[serde(alias = "readTimeout", with = "serde_duration")]
    pub read_timeout: Duration,
    /// 非空时从该键读取 etcd 连接配置
    #[serde(alias = "configKey")]
    pub config_key: String,
    /// 键前缀
    pub prefix: String,
    /// 注册记录的租约 TTL，0 表示不绑定租约
    #[serde(alias = "serviceTTL", alias = "serviceTtl", with = "serde_duration")]
    pub service_ttl: Duration,
    #[serde(flatten)]
    pub etcd: EtcdConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(3),
            config_key: String::new(),
            prefix: "ox".to_string(),
            service_ttl: Duration::ZERO,
            etcd: EtcdConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// 读取 `ox.registry.<name>`
    pub fn std(config: &Configuration, name: &str) -> RegistryResult<Self> {
        Self::raw(config, &format!("ox.registry.{}", name))
    }

    /// 读取任意键，键不存在时使用默认配置
    pub fn raw(config: &Configuration, key: &str) -> RegistryResult<Self> {
        let mut registry_config = if config.exists(key) {
            config.unmarshal_key::<Self>(key, &GetOptions::default())?
        } else {
            debug!("注册中心配置不存在，使用默认值: {}", key);
            Self::default()
        };

        if !registry_config.config_key.is_empty() {
            registry_config.etcd = config.unmarshal_key(&registry_config.config_key, &GetOptions::default())?;
        }
        Ok(registry_config)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_service_ttl(mut self, ttl: Duration) -> Self {
        self.service_ttl = ttl;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}
