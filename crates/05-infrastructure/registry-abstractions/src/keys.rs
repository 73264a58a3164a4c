//! 协调存储中的键布局
//!
//! - 注册记录：`/{prefix}/{name}/providers/{scheme}://{address}`，值为 JSON 编码的 [`ServiceInfo`]
//! - 配置记录：`/{prefix}/{name}/configurators/{scheme}://{host}/{routes|providers|consumers}/{id}`
//! - 治理服务的指标发现记录：`/prometheus/job/{name}/{hostname}/{address}`

use crate::service::ServiceInfo;

/// 配置记录的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfiguratorKind {
    Routes,
    Providers,
    Consumers,
}

impl ConfiguratorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routes => "routes",
            Self::Providers => "providers",
            Self::Consumers => "consumers",
        }
    }
}

/// 服务名下所有记录的公共前缀
pub fn service_prefix(prefix: &str, name: &str) -> String {
    format!("/{}/{}/", prefix, name)
}

/// 某协议下注册记录的公共前缀
pub fn providers_prefix(prefix: &str, name: &str, scheme: &str) -> String {
    format!("/{}/{}/providers/{}://", prefix, name, scheme)
}

/// 注册记录的键
pub fn service_key(prefix: &str, info: &ServiceInfo) -> String {
    format!("/{}/{}/providers/{}://{}", prefix, info.name, info.scheme, info.address)
}

/// 注册记录的值
pub fn service_value(info: &ServiceInfo) -> Result<String, serde_json::Error> {
    serde_json::to_string(info)
}

/// 配置记录的键
pub fn configurator_key(prefix: &str, name: &str, scheme: &str, host: &str, kind: ConfiguratorKind, id: &str) -> String {
    format!(
        "/{}/{}/configurators/{}://{}/{}/{}",
        prefix,
        name,
        scheme,
        host,
        kind.as_str(),
        id
    )
}

/// 指标发现记录的键
pub fn metric_key(name: &str, hostname: &str, address: &str) -> String {
    format!("/prometheus/job/{}/{}/{}", name, hostname, address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let info = ServiceInfo::new("svcA", "grpc", "10.0.0.1:9000");
        assert_eq!(service_key("ox", &info), "/ox/svcA/providers/grpc://10.0.0.1:9000");
        assert!(service_key("ox", &info).starts_with(&providers_prefix("ox", "svcA", "grpc")));
        assert_eq!(
            configurator_key("ox", "svcA", "grpc", "", ConfiguratorKind::Routes, "1"),
            "/ox/svcA/configurators/grpc:///routes/1"
        );
        assert_eq!(metric_key("svcA", "node-1", "10.0.0.1:9000"), "/prometheus/job/svcA/node-1/10.0.0.1:9000");
    }
}
