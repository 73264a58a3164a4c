//! 变更通知通道

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// 深度为 1 的变更通知通道
///
/// 未被消费的通知不会重复入队，连续的多次变更会合并成一次。
#[derive(Debug)]
pub struct ChangeChannel {
    sender: Mutex<Option<mpsc::Sender<()>>>,
    receiver: Mutex<Option<mpsc::Receiver<()>>>,
}

impl ChangeChannel {
    /// 创建新的变更通知通道
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(1);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// 发出变更通知，返回是否新入队了一个通知
    pub fn notify(&self) -> bool {
        let guard = self.sender.lock();
        match guard.as_ref() {
            Some(sender) => match sender.try_send(()) {
                Ok(()) => true,
                Err(TrySendError::Full(())) | Err(TrySendError::Closed(())) => false,
            },
            None => false,
        }
    }

    /// 取走接收端，只能成功一次
    pub fn take_signal(&self) -> Option<ChangeSignal> {
        self.receiver
            .lock()
            .take()
            .map(|receiver| ChangeSignal { receiver })
    }

    /// 关闭通道，接收端在取完剩余通知后结束
    pub fn close(&self) {
        self.sender.lock().take();
    }

    /// 通道是否已关闭
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Default for ChangeChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// 变更信号接收端
#[derive(Debug)]
pub struct ChangeSignal {
    receiver: mpsc::Receiver<()>,
}

impl ChangeSignal {
    /// 等待下一次变更，数据源关闭后返回 `None`
    pub async fn changed(&mut self) -> Option<()> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bursts_are_coalesced() {
        let channel = ChangeChannel::new();
        assert!(channel.notify());
        assert!(!channel.notify(), "未消费的通知不应重复入队");
        assert!(!channel.notify());

        let mut signal = channel.take_signal().expect("首次应能取得信号");
        assert!(channel.take_signal().is_none(), "信号只能取走一次");

        assert_eq!(signal.changed().await, Some(()));
        let pending = tokio::time::timeout(Duration::from_millis(50), signal.changed()).await;
        assert!(pending.is_err(), "合并后只应有一次通知");
    }

    #[tokio::test]
    async fn test_close_ends_signal() {
        let channel = ChangeChannel::new();
        let mut signal = channel.take_signal().unwrap();
        channel.notify();
        channel.close();

        assert_eq!(signal.changed().await, Some(()));
        assert_eq!(signal.changed().await, None);
        assert!(!channel.notify());
    }
}
