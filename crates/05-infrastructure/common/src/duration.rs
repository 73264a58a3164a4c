//! 时长解析
//!
//! 配置中的时长既可以写成 `"300ms"`、`"1h2m3.5s"` 这样的字符串，也可以写成整数纳秒。

use crate::errors::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static DURATION_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:\d+(?:\.\d*)?|\.\d+)(?:ns|us|µs|μs|ms|s|m|h))+$")
        .expect("duration format regex is valid")
});

static DURATION_COMPONENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|μs|ms|s|m|h)")
        .expect("duration component regex is valid")
});

fn unit_nanos(unit: &str) -> f64 {
    match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60.0 * 1e9,
        _ => 3600.0 * 1e9,
    }
}

/// 解析时长字符串
///
/// 不带单位的纯数字按纳秒处理，`"0"` 表示零时长。
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ConfigError::type_conversion("时长字符串为空"));
    }
    if s.starts_with('-') {
        return Err(ConfigError::type_conversion(format!("时长不能为负数: {}", input)));
    }
    let s = s.strip_prefix('+').unwrap_or(s);

    if let Ok(nanos) = s.parse::<u64>() {
        return Ok(Duration::from_nanos(nanos));
    }

    if !DURATION_FORMAT.is_match(s) {
        return Err(ConfigError::type_conversion(format!("无效的时长: {}", input)));
    }

    let total: f64 = DURATION_COMPONENT
        .captures_iter(s)
        .map(|caps| {
            let value = caps[1].parse::<f64>().unwrap_or(0.0);
            value * unit_nanos(&caps[2])
        })
        .sum();

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(ConfigError::type_conversion(format!("时长超出范围: {}", input)));
    }
    Ok(Duration::from_nanos(total.round() as u64))
}

/// 以 `1h2m3.5s` 风格格式化时长
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{}ns", nanos);
    }
    if nanos < 1_000_000 {
        return format!("{}µs", trim_fraction(nanos as f64 / 1e3));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", trim_fraction(nanos as f64 / 1e6));
    }

    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = (total_secs % 60) as f64 + f64::from(duration.subsec_nanos()) / 1e9;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    out.push_str(&format!("{}s", trim_fraction(seconds)));
    out
}

fn trim_fraction(value: f64) -> String {
    let formatted = format!("{:.9}", value);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// serde 时长字段支持，配合 `#[serde(with = "infrastructure_common::duration::serde_duration")]` 使用
pub mod serde_duration {
    use super::{format_duration, parse_duration};
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("时长字符串或整数纳秒")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            parse_duration(value).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_nanos(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_nanos)
                .map_err(|_| E::custom(format!("时长不能为负数: {}", value)))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Duration, E> {
            if value < 0.0 || !value.is_finite() {
                return Err(E::custom(format!("无效的时长: {}", value)));
            }
            Ok(Duration::from_nanos(value as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("1h2m3s").unwrap(), Duration::from_secs(3723));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("250").unwrap(), Duration::from_nanos(250));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("3 days").is_err());
        assert!(parse_duration("1x").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(3)), "3s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_millis(300)), "300ms");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h2m3s");
    }

    #[derive(Debug, Deserialize)]
    struct Timeouts {
        #[serde(with = "serde_duration")]
        read: Duration,
        #[serde(with = "serde_duration")]
        write: Duration,
    }

    #[test]
    fn test_serde_duration_accepts_string_and_integer() {
        let parsed: Timeouts =
            serde_json::from_str(r#"{"read": "3s", "write": 1000000}"#).unwrap();
        assert_eq!(parsed.read, Duration::from_secs(3));
        assert_eq!(parsed.write, Duration::from_millis(1));
    }
}
