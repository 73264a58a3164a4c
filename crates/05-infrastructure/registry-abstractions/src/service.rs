//! 服务实例信息

use infrastructure_common::env;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 服务类型，序列化为数字
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ServiceKind {
    #[default]
    Unknown,
    /// 服务提供方
    Provider,
    /// 治理服务，额外写入指标发现记录
    Governor,
    /// 服务消费方
    Consumer,
}

impl From<u8> for ServiceKind {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Provider,
            2 => Self::Governor,
            3 => Self::Consumer,
            _ => Self::Unknown,
        }
    }
}

impl From<ServiceKind> for u8 {
    fn from(kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::Unknown => 0,
            ServiceKind::Provider => 1,
            ServiceKind::Governor => 2,
            ServiceKind::Consumer => 3,
        }
    }
}

/// 服务实例信息
///
/// 实例身份由 (`name`, `scheme`, `address`) 确定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInfo {
    pub name: String,
    pub app_id: String,
    pub scheme: String,
    /// `host:port`
    pub address: String,
    pub weight: f64,
    pub enable: bool,
    pub healthy: bool,
    pub metadata: HashMap<String, String>,
    pub region: String,
    pub zone: String,
    pub kind: ServiceKind,
    /// 部署组
    pub deployment: String,
    /// 流量分组
    pub group: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            app_id: String::new(),
            scheme: String::new(),
            address: String::new(),
            weight: 100.0,
            enable: true,
            healthy: true,
            metadata: HashMap::new(),
            region: String::new(),
            zone: String::new(),
            kind: ServiceKind::Unknown,
            deployment: String::new(),
            group: String::new(),
        }
    }
}

impl ServiceInfo {
    /// 创建服务实例信息，地域、可用区与部署组取自进程环境变量
    pub fn new(name: impl Into<String>, scheme: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            app_id: std::env::var(env::APP_ID).unwrap_or_default(),
            scheme: scheme.into(),
            address: address.into(),
            region: env::region(),
            zone: env::zone(),
            deployment: env::deployment(),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: ServiceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_enable(mut self, enable: bool) -> Self {
        self.enable = enable;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `scheme://address`
    pub fn label(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_layout() {
        let info = ServiceInfo::new("svcA", "grpc", "10.0.0.1:9000").with_kind(ServiceKind::Provider);
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["name"], json!("svcA"));
        assert_eq!(value["kind"], json!(1));
        assert!(value.get("appId").is_some());

        let decoded: ServiceInfo = serde_json::from_value(json!({
            "name": "svcA",
            "scheme": "grpc",
            "address": "10.0.0.1:9000",
            "kind": 2
        }))
        .unwrap();
        assert_eq!(decoded.kind, ServiceKind::Governor);
        assert!(decoded.enable, "缺省字段使用默认值");
        assert_eq!(decoded.label(), "grpc://10.0.0.1:9000");
    }
}
