//! # 基础设施组合层
//!
//! 把配置树、配置数据源与注册中心组装成一个可运行的整体。
//!
//! ## 主要功能
//!
//! - [`InfrastructureBuilder`] - 按配置地址加载配置，叠加环境变量，构建 `ox.registry` 下声明的注册中心
//! - [`Infrastructure`] - 持有配置树与注册中心，负责服务注册与按序关闭
//! - [`logging`] - 基于 `tracing-subscriber` 的日志初始化
//! - [`defaults`] - 进程级默认配置树与默认注册中心
//!
//! ## 基本使用
//!
//! ```rust,no_run
//! use infrastructure_common::Context;
//! use infrastructure_composition::{InfrastructureBuilder, LoggingConfig};
//! use registry_abstractions::ServiceInfo;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let infrastructure = InfrastructureBuilder::new()
//!         .with_config_addr("config/app.toml?watch=true")
//!         .with_env_prefix("APP_")
//!         .with_logging(LoggingConfig::development())
//!         .build()
//!         .await?;
//!
//!     let name = infrastructure.configuration().get_string("app.name");
//!     let info = ServiceInfo::new(name, "grpc", "127.0.0.1:9000");
//!     infrastructure.register_service(&Context::background(), &info).await?;
//!
//!     infrastructure.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod defaults;
pub mod infrastructure;
pub mod logging;

pub use builder::InfrastructureBuilder;
pub use infrastructure::{Infrastructure, DEFAULT_REGISTRY_NAME};
pub use logging::{init_logging, LoggingConfig};

// 重新导出错误类型
pub use infrastructure_common::InfrastructureError;

#[cfg(test)]
mod tests;
