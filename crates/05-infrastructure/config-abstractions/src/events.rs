//! 配置变更事件定义

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 一次配置应用产生的差异
///
/// 键为扁平化后的完整路径，值为应用后的新值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigChanges {
    /// 变更项
    pub changes: BTreeMap<String, Value>,
    /// 变更时间
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ConfigChanges {
    /// 创建空的差异集合
    pub fn new() -> Self {
        Self {
            changes: BTreeMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// 记录一项变更
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.changes.insert(key.into(), value);
    }

    /// 获取变更后的值
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.changes.get(key)
    }

    /// 是否包含指定键
    pub fn contains(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// 变更的键
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.changes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.changes.iter()
    }

    /// 筛选位于指定前缀下的变更
    ///
    /// `key == prefix` 或 `key` 以 `prefix + delim` 开头时视为匹配。
    pub fn under_prefix(&self, prefix: &str, delim: &str) -> Self {
        let scoped = format!("{}{}", prefix, delim);
        Self {
            changes: self
                .changes
                .iter()
                .filter(|(key, _)| prefix.is_empty() || *key == prefix || key.starts_with(&scoped))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_under_prefix_matches_path_segments() {
        let mut changes = ConfigChanges::new();
        changes.insert("app.name", json!("demo"));
        changes.insert("app.port", json!(8080));
        changes.insert("application.mode", json!("dev"));

        let scoped = changes.under_prefix("app", ".");
        assert_eq!(scoped.len(), 2);
        assert!(scoped.contains("app.name"));
        assert!(!scoped.contains("application.mode"), "前缀应按路径段匹配");

        let exact = changes.under_prefix("app.port", ".");
        assert_eq!(exact.get("app.port"), Some(&json!(8080)));
    }
}
