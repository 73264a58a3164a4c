//! 服务端点聚合

use crate::service::ServiceInfo;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// 上游负载均衡权重
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Upstream {
    /// 按节点分配的权重
    pub nodes: HashMap<String, i64>,
    /// 按分组分配的权重
    pub groups: HashMap<String, i64>,
}

/// 路由配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub id: String,
    pub scheme: String,
    pub host: String,
    pub deployment: String,
    pub uri: String,
    pub upstream: Upstream,
}

/// 服务提供方配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub id: String,
    pub scheme: String,
    pub host: String,
    pub region: String,
    pub zone: String,
    pub deployment: String,
    pub metadata: HashMap<String, String>,
    pub enable: bool,
}

/// 服务消费方配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub id: String,
    pub scheme: String,
    pub host: String,
}

/// 单个服务在某个协议下的端点聚合
///
/// 各映射的键是规范化后的 URI 字符串。订阅方拿到的每一份都是独立的拷贝，互不影响。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoints {
    pub nodes: BTreeMap<String, ServiceInfo>,
    pub route_configs: BTreeMap<String, RouteConfig>,
    pub provider_configs: BTreeMap<String, ProviderConfig>,
    pub consumer_configs: BTreeMap<String, ConsumerConfig>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// 可用节点的地址
    pub fn addresses(&self) -> Vec<&str> {
        self.nodes.values().map(|n| n.address.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.route_configs.is_empty()
            && self.provider_configs.is_empty()
            && self.consumer_configs.is_empty()
    }
}
