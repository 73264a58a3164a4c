//! # Coordination Store
//!
//! 协调存储访问层。注册中心与协调存储数据源都通过这里的抽象访问后端。
//!
//! ## 主要组件
//!
//! - [`CoordinationStore`] - 带修订版本的键值存储接口：读写、前缀监听、租约
//! - [`MemoryStore`] - 进程内实现，支持历史回放、压缩与强制断线，用于测试与单机运行
//! - [`Watch`] - 跟踪修订版本、断线后自动续接的前缀订阅
//! - [`Session`] - 绑定 TTL 租约并自动续期的会话
//! - `EtcdStore` - 基于 etcd v3 的实现（需要 `etcd` feature）

pub mod config;
pub mod memory;
pub mod session;
pub mod store;
pub mod watch;

#[cfg(feature = "etcd")]
pub mod etcd;

pub use config::EtcdConfig;
pub use memory::MemoryStore;
pub use session::Session;
pub use store::*;
pub use watch::{RevisionTracker, Watch, WatchConfig};

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;
