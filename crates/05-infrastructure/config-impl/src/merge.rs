//! 嵌套映射的合并、扁平化与路径查找

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 把 `source` 递归合并到 `target`
///
/// 两侧同为映射时逐键合并，否则由 `source` 覆盖。
pub fn merge_maps(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, incoming) in source {
        match (target.get_mut(&key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_maps(existing, nested),
            (_, incoming) => {
                target.insert(key, incoming);
            }
        }
    }
}

/// 扁平化嵌套映射，键为以 `delim` 连接的完整路径，只保留叶子节点
pub fn flatten(map: &Map<String, Value>, delim: &str) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into("", map, delim, &mut out);
    out
}

fn flatten_into(prefix: &str, map: &Map<String, Value>, delim: &str, out: &mut BTreeMap<String, Value>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}{}{}", prefix, delim, key)
        };
        match value {
            Value::Object(nested) => flatten_into(&path, nested, delim, out),
            leaf => {
                out.insert(path, leaf.clone());
            }
        }
    }
}

/// 沿路径查找值
pub fn deep_search<'a>(map: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (last, parents) = path.split_last()?;
    let mut current = map;
    for part in parents {
        current = current.get(*part)?.as_object()?;
    }
    current.get(*last)
}

/// 由路径构造只包含一个叶子的嵌套映射
pub fn nested_from_path(path: &[&str], value: Value) -> Map<String, Value> {
    let mut leaf = value;
    for part in path.iter().skip(1).rev() {
        let mut map = Map::new();
        map.insert((*part).to_string(), leaf);
        leaf = Value::Object(map);
    }
    let mut root = Map::new();
    if let Some(first) = path.first() {
        root.insert((*first).to_string(), leaf);
    }
    root
}
