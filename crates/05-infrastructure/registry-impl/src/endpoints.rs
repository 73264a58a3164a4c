//! 端点聚合
//!
//! 把服务前缀下的存储事件合并进 [`Endpoints`]。解析失败的记录只记录日志并跳过，不会中断聚合。
//! 节点与配置记录以键中的原始地址 `scheme://host:port[/path]` 为索引，不做任何规范化。

use coordination_store::KeyValue;
use registry_abstractions::{ConsumerConfig, Endpoints, ProviderConfig, RouteConfig, ServiceInfo};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

const PROVIDERS: &str = "providers/";
const CONFIGURATORS: &str = "configurators/";

/// 键中的原始地址
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawUri<'a> {
    raw: &'a str,
    scheme: &'a str,
    /// `host:port`，保留原样
    host: &'a str,
    path: &'a str,
}

/// 应用一条写入事件
///
/// `prefix` 为服务前缀 `/{prefix}/{name}/`，只处理 `scheme` 协议下的记录。
pub fn update_endpoints(al: &mut Endpoints, prefix: &str, scheme: &str, kv: &KeyValue) {
    let Some(rest) = kv.key.strip_prefix(prefix) else {
        return;
    };

    if let Some(addr) = strip_scheme(rest, PROVIDERS, scheme) {
        let Some(uri) = parse_uri(addr, &kv.key) else {
            return;
        };
        let Some(info) = decode::<ServiceInfo>(kv) else {
            return;
        };
        if info.enable {
            al.nodes.insert(uri.raw.to_string(), info);
        } else {
            debug!("服务实例已禁用: {}", uri.raw);
            al.nodes.remove(uri.raw);
        }
    } else if let Some(addr) = strip_scheme(rest, CONFIGURATORS, scheme) {
        let Some(uri) = parse_uri(addr, &kv.key) else {
            return;
        };
        let key = uri.raw.to_string();

        if let Some(id) = uri.path.strip_prefix("/routes/") {
            if let Some(mut route) = decode::<RouteConfig>(kv) {
                route.id = id.to_string();
                route.scheme = uri.scheme.to_string();
                route.host = uri.host.to_string();
                al.route_configs.insert(key, route);
            }
        } else if let Some(id) = uri.path.strip_prefix("/providers/") {
            if let Some(mut provider) = decode::<ProviderConfig>(kv) {
                provider.id = id.to_string();
                provider.scheme = uri.scheme.to_string();
                provider.host = uri.host.to_string();
                al.provider_configs.insert(key, provider);
            }
        } else if let Some(id) = uri.path.strip_prefix("/consumers/") {
            if let Some(mut consumer) = decode::<ConsumerConfig>(kv) {
                consumer.id = id.to_string();
                consumer.scheme = uri.scheme.to_string();
                consumer.host = uri.host.to_string();
                al.consumer_configs.insert(key, consumer);
            }
        } else {
            debug!("忽略未知类别的配置记录: {}", kv.key);
        }
    }
}

/// 应用一条删除事件，删除事件只有键
pub fn delete_endpoints(al: &mut Endpoints, prefix: &str, scheme: &str, key: &str) {
    let Some(rest) = key.strip_prefix(prefix) else {
        return;
    };

    if let Some(addr) = strip_scheme(rest, PROVIDERS, scheme) {
        if let Some(uri) = parse_uri(addr, key) {
            al.nodes.remove(uri.raw);
        }
    } else if let Some(addr) = strip_scheme(rest, CONFIGURATORS, scheme) {
        if let Some(uri) = parse_uri(addr, key) {
            if uri.path.starts_with("/routes/") {
                al.route_configs.remove(uri.raw);
            } else if uri.path.starts_with("/providers/") {
                al.provider_configs.remove(uri.raw);
            } else if uri.path.starts_with("/consumers/") {
                al.consumer_configs.remove(uri.raw);
            }
        }
    } else if is_host_port(rest) {
        // 裸地址形式的键
        al.nodes.remove(rest);
        al.nodes.remove(&format!("{}://{}", scheme, rest));
        al.route_configs.remove(rest);
    }
}

/// 由初始快照构建聚合
pub fn build_endpoints(prefix: &str, scheme: &str, kvs: &[KeyValue]) -> Endpoints {
    let mut al = Endpoints::new();
    for kv in kvs {
        update_endpoints(&mut al, prefix, scheme, kv);
    }
    al
}

/// `providers/grpc://a:1` 去掉类别后要求协议完全匹配，返回 `grpc://a:1`
fn strip_scheme<'a>(rest: &'a str, category: &str, scheme: &str) -> Option<&'a str> {
    let addr = rest.strip_prefix(category)?;
    let after = addr.strip_prefix(scheme)?;
    if after.starts_with("://") {
        Some(addr)
    } else {
        None
    }
}

/// 按 `scheme://authority/path` 拆分，authority 与 path 都保留原样
fn parse_uri<'a>(addr: &'a str, key: &str) -> Option<RawUri<'a>> {
    let parsed = addr.split_once("://").and_then(|(scheme, rest)| {
        let valid = !scheme.is_empty()
            && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid {
            return None;
        }
        let (host, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        if host.chars().any(char::is_whitespace) {
            return None;
        }
        Some(RawUri {
            raw: addr,
            scheme,
            host,
            path,
        })
    });
    if parsed.is_none() {
        warn!("解析注册记录地址失败: {}", key);
    }
    parsed
}

fn decode<T: DeserializeOwned>(kv: &KeyValue) -> Option<T> {
    match serde_json::from_slice(&kv.value) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("解析注册记录内容失败: {}, 原因: {}", kv.key, e);
            None
        }
    }
}

fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && !host.contains('/') && port.parse::<u16>().is_ok(),
        None => false,
    }
}
