//! 配置数据源抽象接口

use crate::signal::ChangeSignal;
use async_trait::async_trait;
use infrastructure_common::DataSourceResult;

/// 配置数据源 trait
///
/// 每个配置地址在进程内只对应一个实例。数据源负责读取原始配置内容，
/// 并在后端内容变化时通过 [`ChangeSignal`] 发出通知。
#[async_trait]
pub trait DataSource: Send + Sync {
    /// 读取完整的配置内容
    async fn read_config(&self) -> DataSourceResult<Vec<u8>>;

    /// 获取变更信号
    ///
    /// 信号只能被取走一次，之后返回 `None`；不支持动态变更的数据源始终返回 `None`。
    fn is_config_changed(&self) -> Option<ChangeSignal>;

    /// 关闭数据源并停止后台监听，关闭后变更信号结束
    async fn close(&self) -> DataSourceResult<()>;

    /// 数据源类型名称
    fn name(&self) -> &str;
}
