//! etcd 连接配置

use infrastructure_common::duration::serde_duration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// etcd 连接配置
///
/// 字段名按 snake_case 序列化，同时接受 camelCase 写法。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// 集群地址
    pub endpoints: Vec<String>,
    #[serde(alias = "certFile")]
    pub cert_file: String,
    #[serde(alias = "keyFile")]
    pub key_file: String,
    #[serde(alias = "caCert")]
    pub ca_cert: String,
    #[serde(alias = "basicAuth")]
    pub basic_auth: bool,
    #[serde(alias = "userName", alias = "username")]
    pub user_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// 连接超时
    #[serde(alias = "connectTimeout", with = "serde_duration")]
    pub connect_timeout: Duration,
    /// 使用 TLS 但不提供证书
    pub secure: bool,
    /// 自动同步集群成员的间隔，0 表示关闭
    #[serde(
        alias = "autoSyncInterval",
        alias = "auto_async_interval",
        alias = "autoAsyncInterval",
        with = "serde_duration"
    )]
    pub auto_sync_interval: Duration,
    /// 默认租约 TTL
    #[serde(with = "serde_duration")]
    pub ttl: Duration,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            cert_file: String::new(),
            key_file: String::new(),
            ca_cert: String::new(),
            basic_auth: false,
            user_name: String::new(),
            password: String::new(),
            connect_timeout: Duration::from_secs(5),
            secure: false,
            auto_sync_interval: Duration::ZERO,
            ttl: Duration::ZERO,
        }
    }
}

impl EtcdConfig {
    /// 是否需要建立 TLS 连接
    pub fn use_tls(&self) -> bool {
        self.secure || !self.ca_cert.is_empty() || (!self.cert_file.is_empty() && !self.key_file.is_empty())
    }

    /// 带协议前缀的地址列表
    pub fn endpoint_urls(&self) -> Vec<String> {
        let scheme = if self.use_tls() { "https" } else { "http" };
        self.endpoints
            .iter()
            .map(|e| {
                if e.contains("://") {
                    e.clone()
                } else {
                    format!("{}://{}", scheme, e)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults() {
        let config: EtcdConfig = serde_json::from_value(serde_json::json!({
            "endpoints": ["10.0.0.1:2379"],
            "connectTimeout": "3s",
            "autoAsyncInterval": "1m",
            "basicAuth": true,
            "password": "secret"
        }))
        .unwrap();

        assert_eq!(config.endpoints, vec!["10.0.0.1:2379"]);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.auto_sync_interval, Duration::from_secs(60));
        assert!(config.basic_auth);

        let out = serde_json::to_value(&config).unwrap();
        assert!(out.get("password").is_none(), "密码不应被序列化");
    }

    #[test]
    fn test_endpoint_urls() {
        let mut config = EtcdConfig::default();
        assert_eq!(config.endpoint_urls(), vec!["http://127.0.0.1:2379"]);
        config.secure = true;
        assert_eq!(config.endpoint_urls(), vec!["https://127.0.0.1:2379"]);
    }
}
