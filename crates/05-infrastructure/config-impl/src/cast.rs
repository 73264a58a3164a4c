//! 宽松的类型转换

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

pub fn to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

pub fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// 整数按纳秒处理，字符串按时长语法解析
pub fn to_duration(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(Duration::from_nanos)
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| Duration::from_nanos(f as u64))),
        Value::String(s) => infrastructure_common::duration::parse_duration(s).ok(),
        _ => None,
    }
}

/// 字符串支持 RFC 3339 与常见日期格式，整数按 Unix 秒处理
pub fn to_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, pattern) {
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// 数组逐项转换，字符串按空白切分
pub fn to_string_slice(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(to_string).collect()),
        Value::String(s) => Some(s.split_whitespace().map(str::to_string).collect()),
        _ => None,
    }
}

pub fn to_slice(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        _ => None,
    }
}

/// 映射原样返回，字符串尝试按 JSON 对象解析
pub fn to_string_map(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

pub fn to_string_map_string(value: &Value) -> Option<HashMap<String, String>> {
    to_string_map(value).map(|map| {
        map.iter()
            .filter_map(|(k, v)| to_string(v).map(|s| (k.clone(), s)))
            .collect()
    })
}

pub fn to_string_map_string_slice(value: &Value) -> Option<HashMap<String, Vec<String>>> {
    to_string_map(value).map(|map| {
        map.iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k.clone(), vec![s.clone()])),
                other => to_string_slice(other).map(|items| (k.clone(), items)),
            })
            .collect()
    })
}

pub fn to_slice_string_map(value: &Value) -> Option<Vec<Map<String, Value>>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(to_string_map).collect()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_casts() {
        assert_eq!(to_string(&json!(42)), Some("42".to_string()));
        assert_eq!(to_bool(&json!("true")), Some(true));
        assert_eq!(to_bool(&json!(0)), Some(false));
        assert_eq!(to_bool(&json!("maybe")), None);
        assert_eq!(to_i64(&json!("17")), Some(17));
        assert_eq!(to_i64(&json!(3.9)), Some(3));
        assert_eq!(to_f64(&json!("2.5")), Some(2.5));
    }

    #[test]
    fn test_duration_and_time_casts() {
        assert_eq!(to_duration(&json!("1m30s")), Some(Duration::from_secs(90)));
        assert_eq!(to_duration(&json!(1_000_000)), Some(Duration::from_millis(1)));
        assert_eq!(to_duration(&json!("soon")), None);

        let parsed = to_time(&json!("2024-03-01T08:00:00Z")).unwrap();
        assert_eq!(parsed.timestamp(), 1_709_280_000);
        assert_eq!(to_time(&json!("2024-03-01")).unwrap().timestamp(), 1_709_251_200);
    }

    #[test]
    fn test_collection_casts() {
        assert_eq!(
            to_string_slice(&json!(["a", 1, true])),
            Some(vec!["a".to_string(), "1".to_string(), "true".to_string()])
        );
        assert_eq!(
            to_string_slice(&json!("a b  c")),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );

        let map = to_string_map_string(&json!({"k": 1, "v": "x"})).unwrap();
        assert_eq!(map["k"], "1");

        let slices = to_string_map_string_slice(&json!({"a": ["x", "y"], "b": "z"})).unwrap();
        assert_eq!(slices["a"], vec!["x", "y"]);
        assert_eq!(slices["b"], vec!["z"]);

        let maps = to_slice_string_map(&json!([{"a": 1}, "skip", {"b": 2}])).unwrap();
        assert_eq!(maps.len(), 2);
    }
}
