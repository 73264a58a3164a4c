//! 基础设施构建器

use crate::infrastructure::Infrastructure;
use crate::logging::{init_logging, LoggingConfig};
use config_abstractions::ConfigFormat;
use config_impl::{Configuration, DataSourceAddr, DataSourceRegistry};
use infrastructure_common::{InfrastructureError, InfrastructureResult};
use registry_abstractions::Registry;
use registry_impl::{NamedRegistry, RegistryBuilders, RegistryItem};
use std::sync::Arc;
use tracing::{debug, info};

/// 基础设施构建器
///
/// 使用建造者模式组装配置树、配置数据源与注册中心。
pub struct InfrastructureBuilder {
    /// 配置地址，例如 `config/app.toml` 或 `etcdv3://127.0.0.1:2379?key=/app/config`
    config_addr: Option<String>,
    /// 配置格式，未指定时按地址扩展名推断
    format: Option<ConfigFormat>,
    /// 环境变量前缀
    env_prefix: Option<String>,
    /// 日志配置，未设置时不初始化日志
    logging: Option<LoggingConfig>,
    configuration: Option<Configuration>,
    data_sources: Option<Arc<DataSourceRegistry>>,
    registry_builders: Option<RegistryBuilders>,
    /// 直接提供的注册中心
    registries: Vec<NamedRegistry>,
}

impl std::fmt::Debug for InfrastructureBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfrastructureBuilder")
            .field("config_addr", &self.config_addr)
            .field("format", &self.format)
            .field("env_prefix", &self.env_prefix)
            .field("logging", &self.logging)
            .field("registries", &self.registries.len())
            .finish()
    }
}

impl Default for InfrastructureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InfrastructureBuilder {
    /// 创建新的基础设施构建器
    pub fn new() -> Self {
        Self {
            config_addr: None,
            format: None,
            env_prefix: None,
            logging: None,
            configuration: None,
            data_sources: None,
            registry_builders: None,
            registries: Vec::new(),
        }
    }

    /// 设置配置地址
    pub fn with_config_addr(mut self, addr: impl Into<String>) -> Self {
        self.config_addr = Some(addr.into());
        self
    }

    /// 指定配置格式
    pub fn with_format(mut self, format: ConfigFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// 加载带前缀的环境变量，在配置地址之后应用
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// 配置日志
    pub fn with_logging(mut self, config: LoggingConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// 使用已有的配置树
    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// 使用自定义的数据源注册表
    pub fn with_data_sources(mut self, data_sources: Arc<DataSourceRegistry>) -> Self {
        self.data_sources = Some(data_sources);
        self
    }

    /// 使用自定义的注册中心构建器
    pub fn with_registry_builders(mut self, builders: RegistryBuilders) -> Self {
        self.registry_builders = Some(builders);
        self
    }

    /// 直接提供注册中心，与配置中声明的同名注册中心冲突时以这里为准
    pub fn add_registry(mut self, name: impl Into<String>, registry: Arc<dyn Registry>) -> Self {
        let item = RegistryItem {
            kind: registry.kind().to_string(),
            ..RegistryItem::default()
        };
        self.registries.push(NamedRegistry {
            name: name.into(),
            item,
            registry,
        });
        self
    }

    /// 构建基础设施实例
    pub async fn build(self) -> InfrastructureResult<Infrastructure> {
        if let Some(logging) = &self.logging {
            init_logging(logging)?;
        }
        info!("开始构建基础设施");

        let configuration = self.configuration.unwrap_or_default();
        let data_sources = self
            .data_sources
            .unwrap_or_else(|| Arc::new(DataSourceRegistry::with_defaults()));

        if let Some(addr) = &self.config_addr {
            let format = match self.format {
                Some(format) => format,
                None => infer_format(addr)?,
            };
            info!("加载配置: {}, 格式 {}", addr, format.name());
            let ds = data_sources.new_data_source(addr).await?;
            configuration.load_from_data_source(ds, format).await?;
        }

        if let Some(prefix) = &self.env_prefix {
            debug!("加载环境变量: {}", prefix);
            configuration.load_environments(prefix)?;
        }

        let builders = self.registry_builders.unwrap_or_else(RegistryBuilders::with_defaults);
        let mut registries = builders.build_from_config(&configuration).await?;
        for provided in self.registries {
            registries.retain(|r| r.name != provided.name);
            registries.push(provided);
        }

        let infrastructure = Infrastructure::new(configuration, data_sources, registries);
        info!("基础设施构建完成");
        Ok(infrastructure)
    }
}

/// 按配置地址的扩展名推断格式
fn infer_format(addr: &str) -> InfrastructureResult<ConfigFormat> {
    let parsed = DataSourceAddr::parse(addr)?;
    let path = match (parsed.path(), parsed.url()) {
        (Some(path), _) => path.to_string_lossy().into_owned(),
        (None, Some(url)) => url.path().to_string(),
        (None, None) => String::new(),
    };
    std::path::Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ConfigFormat::from_extension)
        .ok_or_else(|| InfrastructureError::BootstrapFailed {
            message: format!("无法从配置地址推断格式, 请显式指定: {}", addr),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_format() {
        assert_eq!(infer_format("config/app.toml").unwrap(), ConfigFormat::Toml);
        assert_eq!(infer_format("file:///etc/app/config.yml").unwrap(), ConfigFormat::Yaml);
        assert_eq!(infer_format("https://cfg.local/app.json?watch=true").unwrap(), ConfigFormat::Json);
        assert!(infer_format("etcdv3://127.0.0.1:2379?key=/app/config").is_err());
    }
}
