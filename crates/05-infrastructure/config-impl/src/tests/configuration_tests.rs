//! 配置树行为测试

use crate::configuration::Configuration;
use config_abstractions::{ConfigChanges, ConfigFormat, GetOptions, Unmarshal};
use infrastructure_common::ConfigError;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn loaded(content: &str) -> Configuration {
    let config = Configuration::new();
    config.load(content.as_bytes(), &ConfigFormat::Toml).unwrap();
    config
}

#[test]
fn test_reload_reports_only_changed_leaf() {
    let config = loaded("[a]\nb = 1\nc = \"x\"\n");
    let calls: Arc<Mutex<Vec<ConfigChanges>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&calls);
    config.on_change(move |_, changes| recorded.lock().push(changes.clone()));

    config.load(b"[a]\nb = 2\nc = \"x\"\n", &ConfigFormat::Toml).unwrap();

    assert_eq!(config.get_int("a.b"), 2);
    let calls = calls.lock();
    assert_eq!(calls.len(), 1, "变更回调应只触发一次");
    assert_eq!(calls[0].len(), 1);
    assert_eq!(calls[0].get("a.b"), Some(&json!(2)));
}

#[test]
fn test_identical_reload_is_silent() {
    let content = "name = \"svc\"\n[server]\nport = 8080\n";
    let config = loaded(content);
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    config.on_change(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let parsed = ConfigFormat::Toml.unmarshal(content.as_bytes()).unwrap();
    let diff = config.apply(parsed).unwrap();
    assert!(diff.is_empty(), "相同内容不应产生差异");
    config.load(content.as_bytes(), &ConfigFormat::Toml).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_change_callback_observes_applied_value() {
    let config = loaded("[a]\nb = 1\n");
    let seen = Arc::new(Mutex::new(0));
    let recorded = Arc::clone(&seen);
    config.on_change(move |conf, _| *recorded.lock() = conf.get_int("a.b"));

    config.set("a.b", 7).unwrap();
    assert_eq!(*seen.lock(), 7);
}

#[test]
fn test_on_loaded_fires_once() {
    let config = Configuration::new();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    config.on_loaded(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    config.load(b"a = 1\n", &ConfigFormat::Toml).unwrap();
    config.load(b"a = 2\n", &ConfigFormat::Toml).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1, "加载完成回调只触发一次");

    let late = Arc::new(AtomicUsize::new(0));
    let late_counter = Arc::clone(&late);
    config.on_loaded(move |_| {
        late_counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(late.load(Ordering::SeqCst), 1, "已加载时应立即执行");
}

#[test]
fn test_malformed_content_is_load_error() {
    let config = Configuration::new();
    let result = config.load(b"[a\nb = ", &ConfigFormat::Toml);
    assert!(matches!(result, Err(ConfigError::LoadError { .. })));
    assert!(!config.is_loaded());
}

#[tokio::test]
async fn test_prefix_watch_receives_scoped_changes() {
    let config = loaded("[db]\nhost = \"a\"\n[dbx]\nhost = \"b\"\n");
    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
    config.watch("db", move |_, changes| {
        let _ = sender.send(changes.clone());
    });

    config.set("dbx.host", "c").unwrap();
    config.set("db.host", "d").unwrap();

    let changes = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["db.host"]);
    assert!(
        tokio::time::timeout(Duration::from_millis(100), receiver.recv()).await.is_err(),
        "相似前缀的变更不应通知"
    );
}

#[test]
fn test_typed_getters() {
    let config = loaded(
        r#"
timeout = "300ms"
ratio = "0.5"
enabled = "true"
hosts = ["a", "b"]
words = "x y z"
created = "2024-01-02T03:04:05Z"
[labels]
zone = "sh"
[groups]
web = ["a", "b"]
"#,
    );

    assert_eq!(config.get_duration("timeout"), Duration::from_millis(300));
    assert_eq!(config.get_float64("ratio"), 0.5);
    assert!(config.get_bool("enabled"));
    assert_eq!(config.get_string_slice("hosts"), vec!["a", "b"]);
    assert_eq!(config.get_string_slice("words"), vec!["x", "y", "z"]);
    assert_eq!(config.get_string_map_string("labels").get("zone").map(String::as_str), Some("sh"));
    assert_eq!(config.get_string_map_string_slice("groups")["web"], vec!["a", "b"]);
    assert_eq!(config.get_time("created").map(|t| t.timestamp()), Some(1_704_164_645));
    assert_eq!(config.get_int("missing"), 0);
    assert!(!config.exists("missing"));
}

#[derive(Debug, Deserialize, PartialEq)]
struct ServerConfig {
    listen_addr: String,
    #[serde(default)]
    max_conns: i64,
}

#[test]
fn test_unmarshal_key() {
    let config = loaded("[ox.server]\nlistenAddr = \":8080\"\nmaxConns = 10\n");

    let server: ServerConfig = config
        .unmarshal_key("", &GetOptions::default().buildin_module("server"))
        .unwrap();
    assert_eq!(
        server,
        ServerConfig {
            listen_addr: ":8080".to_string(),
            max_conns: 10
        }
    );

    let missing = config.unmarshal_key::<ServerConfig>("ox.client", &GetOptions::default());
    assert!(matches!(missing, Err(ConfigError::InvalidKey { .. })));

    let fallback = config.unmarshal_with_expect(
        "ox.client",
        ServerConfig {
            listen_addr: "default".to_string(),
            max_conns: 0,
        },
    );
    assert_eq!(fallback.listen_addr, "default");
}

#[test]
fn test_unmarshal_whole_tree_with_json_tags() {
    #[derive(Debug, Deserialize)]
    struct Root {
        #[serde(rename = "appName")]
        app_name: String,
    }

    let config = loaded("appName = \"demo\"\n");
    let root: Root = config.unmarshal_key("", &GetOptions::default().tag_name_json()).unwrap();
    assert_eq!(root.app_name, "demo");
}

#[test]
fn test_sub_is_snapshot() {
    let config = loaded("[a]\nb = 1\n[a.c]\nd = \"x\"\n");
    let sub = config.sub("a");
    assert_eq!(sub.get_int("b"), 1);
    assert_eq!(sub.get_string("c.d"), "x");

    config.set("a.b", 2).unwrap();
    assert_eq!(sub.get_int("b"), 1, "子配置不跟随后续变更");
}

#[test]
fn test_set_creates_intermediate_maps() {
    let config = Configuration::new();
    config.set("x.y.z", "v").unwrap();
    assert_eq!(config.get_string("x.y.z"), "v");
    assert_eq!(config.get_string_map("x.y").get("z"), Some(&json!("v")));
    assert!(matches!(config.set("", 1), Err(ConfigError::InvalidKey { .. })));
}

#[test]
fn test_custom_key_delim() {
    let config = Configuration::with_key_delim("/");
    config.load(b"[a]\nb = 1\n", &ConfigFormat::Toml).unwrap();
    assert_eq!(config.get_int("a/b"), 1);
    assert!(config.traverse("/").contains_key("a/b"));
    assert!(config.traverse(".").contains_key("a.b"));
}

#[test]
fn test_load_environments() {
    std::env::set_var("CFGTEST_FOO_BAR", "baz");
    let config = Configuration::new();
    config.load_environments("CFGTEST_").unwrap();
    assert_eq!(config.get_string("cfgtest.foo.bar"), "baz");
    std::env::remove_var("CFGTEST_FOO_BAR");
}

#[tokio::test]
async fn test_load_from_file_data_source_reloads() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("app.toml");
    std::fs::write(&path, "[a]\nb = 1\n").unwrap();

    let ds = Arc::new(crate::FileDataSource::new(&path, true).unwrap());
    let config = Configuration::new();
    config.load_from_data_source(ds.clone(), ConfigFormat::Toml).await.unwrap();
    assert_eq!(config.get_int("a.b"), 1);

    let loaded_count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loaded_count);
    config.on_loaded(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    std::fs::write(&path, "[a]\nb = 2\n").unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while config.get_int("a.b") != 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(config.get_int("a.b"), 2, "文件变化后应自动刷新");

    std::fs::write(&path, "[a\nbroken").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(config.get_int("a.b"), 2, "刷新失败时保留原有配置");
    assert_eq!(loaded_count.load(Ordering::SeqCst), 1, "刷新不会再次触发加载完成回调");

    config.close().await;
}

#[tokio::test]
async fn test_file_replaced_by_rename_reloads() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("app.toml");
    std::fs::write(&path, "[a]\nb = 1\n").unwrap();

    let ds = Arc::new(crate::FileDataSource::new(&path, true).unwrap());
    let config = Configuration::new();
    config.load_from_data_source(ds, ConfigFormat::Toml).await.unwrap();

    let changes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&changes);
    config.on_change(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // 先写临时文件再重命名覆盖，与常见编辑器的保存方式一致
    let tmp = dir.path().join("app.toml.tmp");
    std::fs::write(&tmp, "[a]\nb = 3\n").unwrap();
    std::fs::rename(&tmp, &path).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while changes.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(config.get_int("a.b"), 3, "重命名替换文件后应自动刷新");
    assert!(changes.load(Ordering::SeqCst) >= 1);

    config.close().await;
}

#[tokio::test]
async fn test_sibling_file_does_not_reload() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("app.toml");
    std::fs::write(&path, "[a]\nb = 1\n").unwrap();

    let ds = Arc::new(crate::FileDataSource::new(&path, true).unwrap());
    let config = Configuration::new();
    config.load_from_data_source(ds, ConfigFormat::Toml).await.unwrap();

    let changes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&changes);
    config.on_change(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    std::fs::write(dir.path().join("other.toml"), "[a]\nb = 9\n").unwrap();
    std::fs::write(dir.path().join("app.toml.bak"), "[a]\nb = 9\n").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(config.get_int("a.b"), 1, "同目录下的其它文件不影响配置");
    assert_eq!(changes.load(Ordering::SeqCst), 0, "同目录下的其它文件不应触发变更");

    config.close().await;
}
