//! 进程内注册中心

use async_trait::async_trait;
use infrastructure_common::{Context, RegistryResult};
use registry_abstractions::{EndpointsStream, Registry, ServiceInfo};
use tracing::info;

/// 本地开发使用的注册中心
///
/// 注册与注销只记录日志。列举与订阅会直接 panic，避免需要服务发现的部署悄悄退化为无发现运行。
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRegistry;

impl LocalRegistry {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Registry for LocalRegistry {
    fn kind(&self) -> &str {
        "local"
    }

    async fn register_service(&self, _ctx: &Context, info: &ServiceInfo) -> RegistryResult<()> {
        info!("本地注册服务: {}, {}", info.name, info.label());
        Ok(())
    }

    async fn unregister_service(&self, _ctx: &Context, info: &ServiceInfo) -> RegistryResult<()> {
        info!("本地注销服务: {}, {}", info.name, info.label());
        Ok(())
    }

    async fn list_services(&self, _ctx: &Context, name: &str, scheme: &str) -> RegistryResult<Vec<ServiceInfo>> {
        panic!("本地注册中心不支持服务发现: {}/{}", name, scheme)
    }

    async fn watch_services(&self, _ctx: &Context, name: &str, scheme: &str) -> RegistryResult<EndpointsStream> {
        panic!("本地注册中心不支持服务发现: {}/{}", name, scheme)
    }

    async fn close(&self) -> RegistryResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_always_succeeds() {
        let registry = LocalRegistry::new();
        let info = ServiceInfo::new("svcA", "grpc", "127.0.0.1:9000");
        let ctx = Context::background();

        registry.register_service(&ctx, &info).await.unwrap();
        registry.unregister_service(&ctx, &info).await.unwrap();
        registry.close().await.unwrap();
        assert_eq!(registry.kind(), "local");
    }

    #[tokio::test]
    #[should_panic(expected = "不支持服务发现")]
    async fn test_list_panics() {
        let _ = LocalRegistry::new().list_services(&Context::background(), "svcA", "grpc").await;
    }

    #[tokio::test]
    #[should_panic(expected = "不支持服务发现")]
    async fn test_watch_panics() {
        let _ = LocalRegistry::new().watch_services(&Context::background(), "svcA", "grpc").await;
    }
}
