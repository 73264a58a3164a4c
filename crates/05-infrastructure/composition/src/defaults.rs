//! 进程级默认实例
//!
//! 供无法显式传递 [`Infrastructure`](crate::Infrastructure) 的外层代码使用。
//! 默认注册中心初始为 [`LocalRegistry`]，通过 [`set_default_registry`] 或
//! [`Infrastructure::install_defaults`](crate::Infrastructure::install_defaults) 替换。

use config_abstractions::GetOptions;
use config_impl::Configuration;
use infrastructure_common::ConfigResult;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use registry_abstractions::Registry;
use registry_impl::LocalRegistry;
use serde_json::Value;
use std::sync::Arc;

static DEFAULT_CONFIGURATION: Lazy<RwLock<Configuration>> = Lazy::new(|| RwLock::new(Configuration::new()));

static DEFAULT_REGISTRY: Lazy<RwLock<Arc<dyn Registry>>> =
    Lazy::new(|| RwLock::new(Arc::new(LocalRegistry::new())));

/// 默认配置树的句柄
pub fn configuration() -> Configuration {
    DEFAULT_CONFIGURATION.read().clone()
}

/// 替换默认配置树
pub fn set_default_configuration(configuration: Configuration) {
    *DEFAULT_CONFIGURATION.write() = configuration;
}

/// 默认注册中心
pub fn default_registry() -> Arc<dyn Registry> {
    Arc::clone(&DEFAULT_REGISTRY.read())
}

/// 替换默认注册中心
pub fn set_default_registry(registry: Arc<dyn Registry>) {
    *DEFAULT_REGISTRY.write() = registry;
}

pub fn get(key: &str) -> Option<Value> {
    configuration().get(key)
}

pub fn get_string(key: &str) -> String {
    configuration().get_string(key)
}

pub fn get_bool(key: &str) -> bool {
    configuration().get_bool(key)
}

pub fn get_int64(key: &str) -> i64 {
    configuration().get_int64(key)
}

pub fn get_duration(key: &str) -> std::time::Duration {
    configuration().get_duration(key)
}

/// 从默认配置树解码结构化配置
pub fn unmarshal_key<T: serde::de::DeserializeOwned>(key: &str, options: &GetOptions) -> ConfigResult<T> {
    configuration().unmarshal_key(key, options)
}
