//! # Registry Abstractions
//!
//! 服务注册与发现的抽象定义。
//!
//! ## 主要组件
//!
//! - [`ServiceInfo`] - 单个服务实例的网络与元数据记录
//! - [`Endpoints`] - 按服务名与协议聚合的节点、路由、提供方与消费方配置
//! - [`Registry`] - 注册、注销、列举与订阅服务的统一接口
//! - [`keys`] - 协调存储中的键布局

pub mod endpoints;
pub mod keys;
pub mod registry;
pub mod service;

pub use endpoints::*;
pub use keys::*;
pub use registry::*;
pub use service::*;
