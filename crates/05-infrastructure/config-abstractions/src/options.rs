//! 结构化解码选项

use serde_json::{Map, Value};

/// 默认的字段标签名称
pub const DEFAULT_TAG_NAME: &str = "mapstructure";

/// 内置模块使用的命名空间
pub const BUILDIN_NAMESPACE: &str = "ox";

/// 解码前对配置键的规范化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStyle {
    /// 把 `readTimeout`、`ReadTimeout`、`read-timeout` 统一为 `read_timeout`，匹配 Rust 字段名
    SnakeCase,
    /// 保持原样，由目标类型自己的 serde 属性决定字段名
    Verbatim,
}

/// 解码选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOptions {
    /// 字段标签名称
    pub tag_name: String,
    /// 命名空间
    pub namespace: String,
    /// 模块
    pub module: String,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            tag_name: DEFAULT_TAG_NAME.to_string(),
            namespace: String::new(),
            module: String::new(),
        }
    }
}

impl GetOptions {
    /// 创建默认选项
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置字段标签名称
    pub fn tag_name(mut self, tag: impl Into<String>) -> Self {
        self.tag_name = tag.into();
        self
    }

    pub fn tag_name_json(self) -> Self {
        self.tag_name("json")
    }

    pub fn tag_name_toml(self) -> Self {
        self.tag_name("toml")
    }

    pub fn tag_name_yaml(self) -> Self {
        self.tag_name("yaml")
    }

    /// 设置命名空间
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// 设置模块
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// 内置模块，命名空间固定为 `ox`
    pub fn buildin_module(self, module: impl Into<String>) -> Self {
        self.namespace(BUILDIN_NAMESPACE).module(module)
    }

    /// 标签名称对应的键规范化方式
    ///
    /// `json`、`toml`、`yaml` 标签按原样匹配，其余标签按字段名规范化匹配。
    pub fn key_style(&self) -> KeyStyle {
        match self.tag_name.as_str() {
            "json" | "toml" | "yaml" => KeyStyle::Verbatim,
            _ => KeyStyle::SnakeCase,
        }
    }

    /// 拼接命名空间、模块与键
    pub fn qualify(&self, key: &str, delim: &str) -> String {
        [self.namespace.as_str(), self.module.as_str(), key]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(delim)
    }
}

/// 把单个键转换为 snake_case
pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower_or_digit = false;
    for ch in key.chars() {
        if ch == '-' || ch == ' ' {
            out.push('_');
            prev_lower_or_digit = false;
        } else if ch.is_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(ch);
            prev_lower_or_digit = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// 按规范化方式递归处理映射键
pub fn normalize_keys(value: Value, style: KeyStyle) -> Value {
    match style {
        KeyStyle::Verbatim => value,
        KeyStyle::SnakeCase => snake_case_keys(value),
    }
}

fn snake_case_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (to_snake_case(&k), snake_case_keys(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(snake_case_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("readTimeout"), "read_timeout");
        assert_eq!(to_snake_case("ReadTimeout"), "read_timeout");
        assert_eq!(to_snake_case("read-timeout"), "read_timeout");
        assert_eq!(to_snake_case("READ_TIMEOUT"), "read_timeout");
        assert_eq!(to_snake_case("serviceTTL"), "service_ttl");
        assert_eq!(to_snake_case("plain"), "plain");
    }

    #[test]
    fn test_key_style_follows_tag_name() {
        assert_eq!(GetOptions::new().key_style(), KeyStyle::SnakeCase);
        assert_eq!(GetOptions::new().tag_name_json().key_style(), KeyStyle::Verbatim);
        assert_eq!(GetOptions::new().tag_name_yaml().key_style(), KeyStyle::Verbatim);
    }

    #[test]
    fn test_qualify() {
        let opts = GetOptions::new().buildin_module("registry");
        assert_eq!(opts.qualify("default", "."), "ox.registry.default");
        assert_eq!(GetOptions::new().qualify("app.name", "."), "app.name");
    }

    #[test]
    fn test_normalize_nested_keys() {
        let value = json!({"readTimeout": "3s", "etcd": [{"connectTimeout": 1}]});
        let normalized = normalize_keys(value.clone(), KeyStyle::SnakeCase);
        assert_eq!(normalized, json!({"read_timeout": "3s", "etcd": [{"connect_timeout": 1}]}));
        assert_eq!(normalize_keys(value.clone(), KeyStyle::Verbatim), value);
    }
}
