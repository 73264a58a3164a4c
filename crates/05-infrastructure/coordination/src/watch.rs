//! 跟踪修订版本的订阅

use crate::store::{CoordinationStore, KeyValue, WatchEvent, WatchOptions, WatchResponse};
use futures::StreamExt;
use infrastructure_common::{Context, StoreResult};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 订阅配置
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// 事件缓冲区大小，缓冲区满时丢弃新事件
    pub buffer: usize,
    /// 断线后重新订阅的等待时间
    pub retry_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            buffer: 100,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// 共享的修订版本游标，只会前进
#[derive(Debug, Clone, Default)]
pub struct RevisionTracker {
    revision: Arc<AtomicI64>,
}

impl RevisionTracker {
    pub fn new(revision: i64) -> Self {
        Self {
            revision: Arc::new(AtomicI64::new(revision)),
        }
    }

    pub fn get(&self) -> i64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// 观察到新的修订版本，返回更新后的值
    pub fn observe(&self, revision: i64) -> i64 {
        let previous = self.revision.fetch_max(revision, Ordering::SeqCst);
        previous.max(revision)
    }

    fn observe_response(&self, response: &WatchResponse) {
        self.observe(response.compact_revision);
        self.observe(response.header_revision);
        if let Some(latest) = response.events.iter().map(|e| e.kv.mod_revision).max() {
            self.observe(latest);
        }
    }
}

/// 跟踪修订版本的订阅
///
/// 后台任务持续消费存储的监听流并记录看到的最大修订版本。监听流断开或被压缩取消后，
/// 等待 `retry_interval` 再从记录的修订版本（包含）重新订阅，因此同一事件可能被重复投递，
/// 消费方需要保证幂等。
pub struct Watch {
    key: String,
    receiver: mpsc::Receiver<WatchEvent>,
    revision: RevisionTracker,
    incipient: Vec<KeyValue>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("key", &self.key)
            .field("revision", &self.revision.get())
            .field("incipient", &self.incipient.len())
            .finish()
    }
}

impl Watch {
    /// 订阅前缀
    ///
    /// 先读取前缀下的现有键值作为初始快照，再从快照之后的下一个修订版本开始订阅，
    /// 快照与事件之间不会遗漏变更。
    pub async fn prefix(
        store: Arc<dyn CoordinationStore>,
        ctx: &Context,
        prefix: impl Into<String>,
        config: WatchConfig,
    ) -> StoreResult<Self> {
        let prefix = prefix.into();
        let snapshot = store.get(ctx, &prefix, true).await?;
        debug!("前缀订阅初始快照: {}, 键数量 {}, 修订版本 {}", prefix, snapshot.kvs.len(), snapshot.revision);

        let mut watch = Self::spawn(store, prefix, true, snapshot.revision + 1, config);
        watch.incipient = snapshot.kvs;
        Ok(watch)
    }

    /// 订阅单个键，`start_revision` 为 0 时从当前开始
    pub fn key(store: Arc<dyn CoordinationStore>, key: impl Into<String>, start_revision: i64, config: WatchConfig) -> Self {
        Self::spawn(store, key.into(), false, start_revision, config)
    }

    fn spawn(store: Arc<dyn CoordinationStore>, key: String, prefix: bool, start_revision: i64, config: WatchConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.buffer.max(1));
        let revision = RevisionTracker::new(start_revision);
        let cancel = CancellationToken::new();

        tokio::spawn(watch_loop(
            store,
            key.clone(),
            prefix,
            revision.clone(),
            sender,
            config,
            cancel.clone(),
        ));

        Self {
            key,
            receiver,
            revision,
            incipient: Vec::new(),
            cancel,
        }
    }

    /// 接收下一个事件，订阅关闭后返回 `None`
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.receiver.recv().await
    }

    /// 当前记录的修订版本
    pub fn revision(&self) -> i64 {
        self.revision.get()
    }

    /// 外部观察到了更新的修订版本
    pub fn observe_revision(&self, revision: i64) {
        self.revision.observe(revision);
    }

    /// 修订版本游标的共享句柄
    pub fn revision_tracker(&self) -> RevisionTracker {
        self.revision.clone()
    }

    /// 订阅建立时读取的初始键值
    pub fn incipient_key_values(&self) -> &[KeyValue] {
        &self.incipient
    }

    pub fn key_name(&self) -> &str {
        &self.key
    }

    /// 停止订阅
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn watch_loop(
    store: Arc<dyn CoordinationStore>,
    key: String,
    prefix: bool,
    revision: RevisionTracker,
    sender: mpsc::Sender<WatchEvent>,
    config: WatchConfig,
    cancel: CancellationToken,
) {
    loop {
        let options = WatchOptions {
            prefix,
            start_revision: revision.get(),
        };
        match store.watch(&key, options).await {
            Ok(mut stream) => loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => return,
                    item = stream.next() => item,
                };
                match item {
                    None => {
                        debug!("监听流已断开: {}", key);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("监听流错误: {}, 原因: {}", key, e);
                        break;
                    }
                    Some(Ok(response)) => {
                        revision.observe_response(&response);
                        if response.canceled {
                            info!(
                                "监听被取消: {}, 压缩版本 {}, 从修订版本 {} 重新订阅",
                                key,
                                response.compact_revision,
                                revision.get()
                            );
                            break;
                        }
                        for event in response.events {
                            match sender.try_send(event) {
                                Ok(()) => {}
                                Err(TrySendError::Full(event)) => {
                                    warn!("订阅缓冲区已满, 丢弃事件: {}", event.kv.key);
                                }
                                Err(TrySendError::Closed(_)) => return,
                            }
                        }
                    }
                }
            },
            Err(e) => warn!("打开监听流失败: {}, 原因: {}", key, e),
        }

        if sender.is_closed() {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.retry_interval) => {}
        }
    }
}
