//! # Registry Implementation
//!
//! 服务注册与发现的实现。
//!
//! ## 主要组件
//!
//! - [`EtcdV3Registry`] - 基于协调存储的注册中心：租约注册、前缀订阅、端点聚合
//! - [`LocalRegistry`] - 进程内注册中心，只记录日志，不支持服务发现
//! - [`RegistryBuilders`] - 注册中心类型到构建函数的映射表
//! - [`RegistryConfig`] - 注册中心配置
//! - [`endpoints`] - 把存储事件合并为 [`Endpoints`](registry_abstractions::Endpoints) 快照

pub mod builder;
pub mod config;
pub mod endpoints;
pub mod etcdv3;
pub mod local;

pub use builder::{NamedRegistry, RegistryBuilder, RegistryBuilders, RegistryItem, KIND_ETCDV3, KIND_LOCAL};
pub use config::RegistryConfig;
pub use etcdv3::EtcdV3Registry;
pub use local::LocalRegistry;
