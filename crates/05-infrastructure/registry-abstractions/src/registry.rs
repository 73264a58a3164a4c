//! 注册中心接口

use crate::endpoints::Endpoints;
use crate::service::ServiceInfo;
use async_trait::async_trait;
use infrastructure_common::{Context, RegistryResult};
use tokio::sync::mpsc;

/// 端点快照流
///
/// 第一份是订阅时的当前状态，之后每次变更推送一份新的快照。消费过慢时新快照会被丢弃。
pub type EndpointsStream = mpsc::Receiver<Endpoints>;

/// 订阅端点快照流的缓冲深度
pub const ENDPOINTS_BUFFER: usize = 10;

/// 服务注册与发现
#[async_trait]
pub trait Registry: Send + Sync + std::fmt::Debug {
    /// 注册中心类型
    fn kind(&self) -> &str;

    /// 注册服务实例
    async fn register_service(&self, ctx: &Context, info: &ServiceInfo) -> RegistryResult<()>;

    /// 注销服务实例，实例不存在不是错误
    async fn unregister_service(&self, ctx: &Context, info: &ServiceInfo) -> RegistryResult<()>;

    /// 列举服务在某协议下的所有实例
    async fn list_services(&self, ctx: &Context, name: &str, scheme: &str) -> RegistryResult<Vec<ServiceInfo>>;

    /// 订阅服务在某协议下的端点变化
    ///
    /// `ctx` 只约束订阅的建立过程，订阅在注册中心关闭或流被丢弃后结束。
    async fn watch_services(&self, ctx: &Context, name: &str, scheme: &str) -> RegistryResult<EndpointsStream>;

    /// 关闭注册中心，尽力注销本进程注册过的所有实例
    async fn close(&self) -> RegistryResult<()>;
}
