use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::DispatchError;

/// 线性退避重试策略：第 n 次失败后等待 `base * n`，最多尝试 `max_attempts` 次。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// 只尝试一次（simpleParametric 使用）
    pub fn single_shot() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// 第 `attempt` 次（从 1 开始）失败后的等待时长
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

pub type PauseFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// 退避等待的实现。
///
/// 生产环境使用 [`TokioPause`]（挂起当前任务，不占用 worker 线程）；测试可替换为只记录时长的实现。
pub trait Pause: Send + Sync {
    fn pause(&self, delay: Duration) -> PauseFuture<'_>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPause;

impl Pause for TokioPause {
    fn pause(&self, delay: Duration) -> PauseFuture<'_> {
        Box::pin(tokio::time::sleep(delay))
    }
}

/// 按策略执行 `op`。
///
/// - 成功立即返回；
/// - 不可重试的错误原样返回；
/// - 可重试错误在尝试次数用尽后转为 [`DispatchError::BackendExhausted`]。
///
/// `op` 的参数为当前尝试序号（从 1 开始）。调用方放弃请求时（future 被 drop），
/// 正在进行的尝试或退避等待会在下一个挂起点被取消。
pub async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    pause: &dyn Pause,
    mut op: F,
) -> Result<T, DispatchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, DispatchError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                tracing::warn!("后端调用第 {} 次尝试失败: {}", attempt, e);
                if attempt >= policy.max_attempts {
                    tracing::error!("后端调用已重试 {} 次，放弃", attempt);
                    let timeout = matches!(e, DispatchError::BackendTransient { timeout: true, .. });
                    return Err(DispatchError::BackendExhausted {
                        attempts: attempt,
                        last: e.to_string(),
                        timeout,
                    });
                }
                pause.pause(policy.delay_after(attempt)).await;
                attempt += 1;
            }
        }
    }
}
