//! 基础设施主入口

use crate::builder::InfrastructureBuilder;
use config_impl::{Configuration, DataSourceRegistry};
use infrastructure_common::{Context, InfrastructureError, InfrastructureResult};
use registry_abstractions::{Registry, ServiceInfo};
use registry_impl::{LocalRegistry, NamedRegistry, RegistryItem};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// 默认注册中心的名称
pub const DEFAULT_REGISTRY_NAME: &str = "default";

/// 组装好的基础设施
///
/// 持有配置树、本实例创建的配置数据源以及按名称声明的注册中心。
pub struct Infrastructure {
    configuration: Configuration,
    data_sources: Arc<DataSourceRegistry>,
    registries: Vec<NamedRegistry>,
    default_registry: NamedRegistry,
}

impl std::fmt::Debug for Infrastructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Infrastructure")
            .field("configuration", &self.configuration)
            .field("registries", &self.registry_names())
            .field("default_registry", &self.default_registry.name)
            .finish()
    }
}

impl Infrastructure {
    /// 创建基础设施构建器
    pub fn builder() -> InfrastructureBuilder {
        InfrastructureBuilder::new()
    }

    /// 默认注册中心取名为 `default` 的注册中心，其次是第一个，都没有时使用本地注册中心
    pub(crate) fn new(
        configuration: Configuration,
        data_sources: Arc<DataSourceRegistry>,
        registries: Vec<NamedRegistry>,
    ) -> Self {
        let default_registry = registries
            .iter()
            .find(|r| r.name == DEFAULT_REGISTRY_NAME)
            .or_else(|| registries.first())
            .cloned()
            .unwrap_or_else(|| NamedRegistry {
                name: DEFAULT_REGISTRY_NAME.to_string(),
                item: RegistryItem {
                    kind: registry_impl::KIND_LOCAL.to_string(),
                    ..RegistryItem::default()
                },
                registry: Arc::new(LocalRegistry::new()),
            });
        info!(
            "默认注册中心: {}, 类型 {}",
            default_registry.name,
            default_registry.registry.kind()
        );

        Self {
            configuration,
            data_sources,
            registries,
            default_registry,
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn data_sources(&self) -> &Arc<DataSourceRegistry> {
        &self.data_sources
    }

    /// 按名称获取注册中心
    pub fn registry(&self, name: &str) -> Option<Arc<dyn Registry>> {
        self.registries
            .iter()
            .find(|r| r.name == name)
            .map(|r| Arc::clone(&r.registry))
    }

    pub fn registry_names(&self) -> Vec<&str> {
        self.registries.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn default_registry(&self) -> Arc<dyn Registry> {
        Arc::clone(&self.default_registry.registry)
    }

    /// 在默认注册中心注册服务，声明了延迟时先等待
    pub async fn register_service(&self, ctx: &Context, info: &ServiceInfo) -> InfrastructureResult<()> {
        let delay = self.default_registry.item.delay();
        if delay > Duration::ZERO {
            info!("延迟 {:?} 后注册服务: {}", delay, info.label());
            tokio::time::sleep(delay).await;
        }
        self.default_registry.registry.register_service(ctx, info).await?;
        Ok(())
    }

    /// 从默认注册中心注销服务
    pub async fn unregister_service(&self, ctx: &Context, info: &ServiceInfo) -> InfrastructureResult<()> {
        self.default_registry.registry.unregister_service(ctx, info).await?;
        Ok(())
    }

    /// 把本实例的配置树与默认注册中心设为进程级默认实例
    pub fn install_defaults(&self) {
        crate::defaults::set_default_configuration(self.configuration.clone());
        crate::defaults::set_default_registry(self.default_registry());
    }

    /// 依次关闭注册中心、配置数据源与配置刷新任务
    ///
    /// 每一步的失败都会记录下来，不影响后续步骤。
    pub async fn shutdown(&self) -> InfrastructureResult<()> {
        info!("关闭基础设施");
        let mut failures = Vec::new();

        let mut closed: Vec<&Arc<dyn Registry>> = Vec::new();
        let all = self
            .registries
            .iter()
            .chain(std::iter::once(&self.default_registry))
            .map(|r| (&r.name, &r.registry));
        for (name, registry) in all {
            if closed.iter().any(|c| Arc::ptr_eq(c, registry)) {
                continue;
            }
            closed.push(registry);
            if let Err(e) = registry.close().await {
                error!("关闭注册中心失败: {}, 原因: {}", name, e);
                failures.push(format!("{}: {}", name, e));
            }
        }

        self.data_sources.close_all().await;
        self.configuration.close().await;

        if failures.is_empty() {
            info!("基础设施已关闭");
            Ok(())
        } else {
            Err(InfrastructureError::ShutdownFailed {
                message: failures.join("; "),
            })
        }
    }
}
