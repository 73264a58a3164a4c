//! 调用上下文
//!
//! 每个访问网络边界的公开入口都接收一个 [`Context`]，它携带可选的截止时间和取消信号，
//! 并在协调存储与 HTTP 调用处统一生效。

use crate::errors::ContextError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 截止时间与取消信号
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Context {
    /// 创建不带截止时间的根上下文
    pub fn background() -> Self {
        Self::default()
    }

    /// 创建在 `timeout` 后超时的上下文
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// 创建绑定到指定取消信号的上下文
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel,
        }
    }

    /// 派生子上下文，截止时间取两者中较早的一个
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.child_token(),
        }
    }

    /// 未设置截止时间时使用默认超时
    pub fn or_timeout(&self, default_timeout: Duration) -> Self {
        match self.deadline {
            Some(_) => self.clone(),
            None => self.child_with_timeout(default_timeout),
        }
    }

    /// 截止时间
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 取消信号
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 取消上下文
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 上下文是否已经结束
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// 在上下文约束下执行异步操作
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<ContextError>,
    {
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ContextError::Canceled.into()),
            _ = expired => Err(ContextError::DeadlineExceeded.into()),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_before_deadline() {
        let ctx = Context::with_timeout(Duration::from_secs(1));
        let result: Result<u32, ContextError> = ctx.run(async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let ctx = Context::with_timeout(Duration::from_millis(20));
        let result: Result<(), ContextError> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_child() {
        let parent = Context::background();
        let child = parent.or_timeout(Duration::from_secs(10));
        assert!(child.deadline().is_some(), "未设置截止时间时应补充默认超时");

        parent.cancel();
        let result: Result<(), ContextError> = child.run(std::future::pending()).await;
        assert_eq!(result, Err(ContextError::Canceled));
    }

    #[test]
    fn test_child_keeps_earlier_deadline() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }
}
