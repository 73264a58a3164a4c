//! 协调存储抽象接口

use async_trait::async_trait;
use futures::stream::BoxStream;
use infrastructure_common::{Context, StoreResult};
use std::time::Duration;

/// 租约 ID
pub type LeaseId = i64;

/// 带修订版本信息的键值对
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub version: i64,
    /// 绑定的租约，0 表示未绑定
    pub lease: LeaseId,
}

impl KeyValue {
    /// 以 UTF-8 读取值
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Put,
    Delete,
}

/// 监听事件，删除事件只携带键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub kv: KeyValue,
}

/// 读取结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetResponse {
    pub kvs: Vec<KeyValue>,
    /// 读取时存储的修订版本
    pub revision: i64,
}

/// 监听响应
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchResponse {
    /// 响应时存储的修订版本
    pub header_revision: i64,
    /// 非 0 时表示请求的起始版本已被压缩
    pub compact_revision: i64,
    /// 服务端取消了该监听，流随后结束
    pub canceled: bool,
    pub events: Vec<WatchEvent>,
}

/// 监听选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// 按前缀监听
    pub prefix: bool,
    /// 起始修订版本（包含），0 表示从当前开始
    pub start_revision: i64,
}

impl WatchOptions {
    pub fn prefix() -> Self {
        Self {
            prefix: true,
            start_revision: 0,
        }
    }

    pub fn key() -> Self {
        Self::default()
    }

    pub fn from_revision(mut self, revision: i64) -> Self {
        self.start_revision = revision;
        self
    }
}

/// 监听响应流，流结束表示连接断开或被取消
pub type WatchStream = BoxStream<'static, StoreResult<WatchResponse>>;

/// 协调存储接口
///
/// 所有请求类调用都受 [`Context`] 的截止时间与取消信号约束。同一个监听流内的事件按全局修订版本有序。
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// 读取单个键或前缀下的所有键
    async fn get(&self, ctx: &Context, key: &str, prefix: bool) -> StoreResult<GetResponse>;

    /// 写入键值，可绑定租约，返回写入后的修订版本
    async fn put(&self, ctx: &Context, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> StoreResult<i64>;

    /// 删除单个键或前缀下的所有键，返回删除的数量，键不存在不是错误
    async fn delete(&self, ctx: &Context, key: &str, prefix: bool) -> StoreResult<i64>;

    /// 打开监听流
    async fn watch(&self, key: &str, options: WatchOptions) -> StoreResult<WatchStream>;

    /// 创建租约
    async fn grant_lease(&self, ctx: &Context, ttl: Duration) -> StoreResult<LeaseId>;

    /// 续期一次，返回剩余 TTL
    async fn keep_alive_once(&self, ctx: &Context, lease: LeaseId) -> StoreResult<Duration>;

    /// 撤销租约，绑定的键随之删除
    async fn revoke_lease(&self, ctx: &Context, lease: LeaseId) -> StoreResult<()>;
}
