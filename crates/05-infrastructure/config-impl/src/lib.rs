//! # Configuration Implementation
//!
//! 可热更新的配置树以及各种配置数据源的实现。
//!
//! ## 主要组件
//!
//! - [`Configuration`] - 配置树：合并加载、变更通知、前缀监听、类型化读取
//! - [`DataSourceRegistry`] - 按地址 scheme 创建配置数据源
//! - [`FileDataSource`] - 本地文件，可监听目录变化
//! - [`HttpDataSource`] - HTTP 拉取，带本地缓存与轮询
//! - [`EtcdDataSource`] - 协调存储中的单个配置键
//! - [`ApolloDataSource`] - Apollo 配置中心的单个配置项

pub mod cast;
pub mod configuration;
pub mod datasource;
pub mod merge;

pub use configuration::*;
pub use datasource::{
    default_data_sources, new_data_source, ApolloClient, ApolloConfig, ApolloDataSource, DataSourceAddr,
    DataSourceRegistry, EtcdDataSource, FileDataSource, HttpDataSource,
};

#[cfg(test)]
mod tests;
