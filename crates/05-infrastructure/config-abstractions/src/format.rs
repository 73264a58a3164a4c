//! 配置内容格式

use infrastructure_common::{ConfigError, ConfigResult};
use serde_json::{Map, Value};
use std::path::Path;

/// 配置内容解析 trait
///
/// 把原始字节解析成嵌套的键值树，闭包 `Fn(&[u8]) -> ConfigResult<Map<String, Value>>` 自动实现此 trait。
pub trait Unmarshal: Send + Sync {
    fn unmarshal(&self, content: &[u8]) -> ConfigResult<Map<String, Value>>;
}

impl<F> Unmarshal for F
where
    F: Fn(&[u8]) -> ConfigResult<Map<String, Value>> + Send + Sync,
{
    fn unmarshal(&self, content: &[u8]) -> ConfigResult<Map<String, Value>> {
        self(content)
    }
}

/// 内置的配置格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    /// 按文件扩展名推断格式
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        Self::from_extension(&ext)
    }

    /// 按扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.') {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    /// 格式名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

impl Unmarshal for ConfigFormat {
    fn unmarshal(&self, content: &[u8]) -> ConfigResult<Map<String, Value>> {
        let text = std::str::from_utf8(content)
            .map_err(|e| ConfigError::load_error(format!("配置内容不是有效的 UTF-8: {}", e)))?;
        if text.trim().is_empty() {
            return Ok(Map::new());
        }

        let value = match self {
            Self::Toml => {
                let parsed: toml::Value = toml::from_str(text)
                    .map_err(|e| ConfigError::load_error(format!("TOML 解析失败: {}", e)))?;
                toml_to_json(&parsed)
            }
            Self::Json => serde_json::from_str(text)
                .map_err(|e| ConfigError::load_error(format!("JSON 解析失败: {}", e)))?,
            Self::Yaml => {
                let parsed: serde_yaml::Value = serde_yaml::from_str(text)
                    .map_err(|e| ConfigError::load_error(format!("YAML 解析失败: {}", e)))?;
                yaml_to_json(parsed)
            }
        };

        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(ConfigError::load_error(format!(
                "配置根节点必须是映射, 实际为: {}",
                other
            ))),
        }
    }
}

/// TOML 值转 JSON 值
pub fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::Number(serde_json::Number::from(*i)),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Array(arr) => Value::Array(arr.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
    }
}

/// YAML 值转 JSON 值，非字符串键按其文本形式保存
pub fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => Value::Array(seq.into_iter().map(yaml_to_json).collect()),
        serde_yaml::Value::Mapping(mapping) => Value::Object(
            mapping
                .into_iter()
                .map(|(k, v)| (yaml_key(k), yaml_to_json(v)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
