//! 基础设施组装的集成测试

use crate::{defaults, InfrastructureBuilder, DEFAULT_REGISTRY_NAME};
use config_impl::Configuration;
use coordination_store::{CoordinationStore, MemoryStore};
use infrastructure_common::Context;
use registry_abstractions::{Registry, ServiceInfo};
use registry_impl::{EtcdV3Registry, RegistryBuilders, RegistryConfig, RegistryItem};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn memory_builders(store: Arc<MemoryStore>) -> RegistryBuilders {
    let builders = RegistryBuilders::with_defaults();
    builders
        .register("memory", move |config: Configuration, name: String, item: RegistryItem| {
            let store = Arc::clone(&store);
            async move {
                let registry_config = RegistryConfig::raw(&config, &item.config_key_for(&name))?;
                let registry: Arc<dyn Registry> = Arc::new(EtcdV3Registry::new(store, registry_config));
                Ok(registry)
            }
        })
        .unwrap();
    builders
}

fn config_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn test_build_from_file_with_registries() {
    let file = config_file(
        r#"
        [app]
        name = "svcA"

        [ox.registry.main]
        kind = "memory"
        prefix = "demo"
        "#,
    );
    let store = Arc::new(MemoryStore::new());

    let infrastructure = InfrastructureBuilder::new()
        .with_config_addr(file.path().to_string_lossy())
        .with_registry_builders(memory_builders(store.clone()))
        .build()
        .await
        .unwrap();

    assert_eq!(infrastructure.configuration().get_string("app.name"), "svcA");
    assert_eq!(infrastructure.registry_names(), vec!["main"]);
    assert_eq!(infrastructure.default_registry().kind(), "etcdv3");

    let ctx = Context::background();
    let info = ServiceInfo::new("svcA", "grpc", "10.0.0.1:9000");
    infrastructure.register_service(&ctx, &info).await.unwrap();
    let services = infrastructure
        .registry("main")
        .unwrap()
        .list_services(&ctx, "svcA", "grpc")
        .await
        .unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(store.get(&ctx, "/demo/svcA/", true).await.unwrap().kvs.len(), 1);

    infrastructure.shutdown().await.unwrap();
    assert!(
        store.get(&ctx, "/demo/", true).await.unwrap().kvs.is_empty(),
        "关闭后注册记录应被清理"
    );
}

#[tokio::test]
async fn test_defaults_to_local_registry() {
    let infrastructure = InfrastructureBuilder::new().build().await.unwrap();
    assert!(infrastructure.registry_names().is_empty());
    assert_eq!(infrastructure.default_registry().kind(), "local");

    let info = ServiceInfo::new("svcA", "grpc", "10.0.0.1:9000");
    infrastructure
        .register_service(&Context::background(), &info)
        .await
        .unwrap();
    infrastructure.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_provided_registry_takes_precedence() {
    let file = config_file(
        r#"
        [ox.registry.default]
        kind = "local"

        [ox.registry.other]
        kind = "local"
        "#,
    );
    let store = Arc::new(MemoryStore::new());
    let provided: Arc<dyn Registry> = Arc::new(EtcdV3Registry::new(store, RegistryConfig::default()));

    let infrastructure = InfrastructureBuilder::new()
        .with_config_addr(file.path().to_string_lossy())
        .add_registry(DEFAULT_REGISTRY_NAME, Arc::clone(&provided))
        .build()
        .await
        .unwrap();

    let mut names = infrastructure.registry_names();
    names.sort();
    assert_eq!(names, vec!["default", "other"]);
    assert_eq!(infrastructure.default_registry().kind(), "etcdv3");

    infrastructure.install_defaults();
    assert_eq!(defaults::default_registry().kind(), "etcdv3");
    infrastructure.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_environment_overlay() {
    std::env::set_var("COMPOSITIONTEST_SERVER_PORT", "9090");
    let file = config_file("[compositiontest.server]\nport = 8080\nhost = \"0.0.0.0\"\n");

    let infrastructure = InfrastructureBuilder::new()
        .with_config_addr(file.path().to_string_lossy())
        .with_env_prefix("COMPOSITIONTEST_")
        .build()
        .await
        .unwrap();

    let configuration = infrastructure.configuration();
    assert_eq!(configuration.get_int64("compositiontest.server.port"), 9090, "环境变量覆盖文件配置");
    assert_eq!(configuration.get_string("compositiontest.server.host"), "0.0.0.0");
    infrastructure.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_config_file_fails() {
    let result = InfrastructureBuilder::new()
        .with_config_addr("/definitely/not/here/app.toml")
        .build()
        .await;
    assert!(result.is_err());
}
