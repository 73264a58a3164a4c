//! HTTP 与 Apollo 数据源的集成测试

use config_abstractions::{ConfigFormat, DataSource};
use config_impl::{ApolloDataSource, Configuration, DataSourceAddr, HttpDataSource};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_http_source_falls_back_to_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app.toml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[a]\nb = 1\n"))
        .mount(&server)
        .await;

    let cache = TempDir::new().unwrap();
    let url = format!("{}/app.toml", server.uri());
    let ds = HttpDataSource::new(url, cache.path(), None).unwrap();
    assert_eq!(ds.read_config().await.unwrap(), b"[a]\nb = 1\n");
    assert!(ds.is_config_changed().is_none(), "未开启轮询时没有变更信号");

    drop(server);
    assert_eq!(
        ds.read_config().await.unwrap(),
        b"[a]\nb = 1\n",
        "服务不可用时应使用本地缓存"
    );
}

#[tokio::test]
async fn test_http_source_polling_reloads_configuration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app.toml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[a]\nb = 1\n"))
        .mount(&server)
        .await;

    let cache = TempDir::new().unwrap();
    let raw = format!(
        "{}/app.toml?watch=true&pollInterval=100ms&cacheDir={}",
        server.uri(),
        cache.path().display()
    );
    let addr = DataSourceAddr::parse(&raw).unwrap();
    let ds = Arc::new(HttpDataSource::from_addr(&addr).unwrap());
    assert_eq!(ds.url(), format!("{}/app.toml", server.uri()));

    let config = Configuration::new();
    config.load_from_data_source(ds.clone(), ConfigFormat::Toml).await.unwrap();
    assert_eq!(config.get_int("a.b"), 1);

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/app.toml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[a]\nb = 2\n"))
        .mount(&server)
        .await;

    assert!(wait_until(|| config.get_int("a.b") == 2).await, "轮询到新内容后应刷新配置");
    ds.close().await.unwrap();
    config.close().await;
}

#[tokio::test]
async fn test_apollo_source_reads_key_and_follows_releases() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/configs/demo/default/application"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "appId": "demo",
            "cluster": "default",
            "namespaceName": "application",
            "releaseKey": "r1",
            "configurations": { "app.toml": "[a]\nb = 1\n" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/notifications/v2"))
        .respond_with(ResponseTemplate::new(304).set_delay(Duration::from_millis(100)))
        .mount(&server)
        .await;

    let cache = TempDir::new().unwrap();
    let raw = format!(
        "apollo://{}?appId=demo&key=app.toml&cacheDir={}",
        server.address(),
        cache.path().display()
    );
    let ds = ApolloDataSource::from_addr(&DataSourceAddr::parse(&raw).unwrap())
        .await
        .unwrap();
    assert_eq!(ds.read_config().await.unwrap(), b"[a]\nb = 1\n");
    assert!(cache.path().join("demo_default_application.json").exists(), "应写入本地备份");

    let mut signal = ds.is_config_changed().expect("应有变更信号");

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/notifications/v2"))
        .and(query_param("appId", "demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "namespaceName": "application", "notificationId": 2 }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/configs/demo/default/application"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "releaseKey": "r2",
            "configurations": { "app.toml": "[a]\nb = 2\n" }
        })))
        .mount(&server)
        .await;

    let changed = tokio::time::timeout(Duration::from_secs(5), signal.changed()).await;
    assert_eq!(changed.ok().flatten(), Some(()));
    assert_eq!(ds.read_config().await.unwrap(), b"[a]\nb = 2\n");
    ds.close().await.unwrap();
}

#[tokio::test]
async fn test_apollo_source_requires_app_id() {
    let addr = DataSourceAddr::parse("apollo://127.0.0.1:8080?key=app.toml").unwrap();
    assert!(ApolloDataSource::from_addr(&addr).await.is_err());
}
