//! 进程退出协调
//!
//! 监听 SIGINT/SIGTERM（Windows 下为 Ctrl+C），把第一次收到的退出原因广播给 HTTP 服务与后台任务。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// 退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// 应用主动退出
    Application,
}

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("信号监听注册失败: {0}")]
    SignalSetup(#[from] std::io::Error),
}

/// 退出协调器：只有第一次触发生效
#[derive(Debug, Clone)]
pub struct ShutdownManager {
    reason: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            reason: Arc::new(tx),
        }
    }

    /// 触发退出，返回本次是否生效
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let accepted = self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if accepted {
            info!("触发优雅退出: {:?}", reason);
        } else {
            debug!("重复的退出信号被忽略: {:?}", reason);
        }
        accepted
    }

    pub fn is_shutting_down(&self) -> bool {
        self.reason.borrow().is_some()
    }

    /// 等待退出信号；已触发时立即返回
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.reason.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Application),
            Err(_) => ShutdownReason::Application,
        }
    }

    /// 注册系统信号监听
    pub fn listen_for_signals(&self) -> Result<(), ShutdownError> {
        let manager = self.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;
            tokio::spawn(async move {
                tokio::select! {
                    _ = sigint.recv() => { manager.trigger(ShutdownReason::Interrupt); }
                    _ = sigterm.recv() => { manager.trigger(ShutdownReason::Terminate); }
                }
            });
        }

        #[cfg(not(unix))]
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    manager.trigger(ShutdownReason::Interrupt);
                }
                Err(e) => tracing::error!("监听 Ctrl+C 失败: {e}"),
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_trigger_wins() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutting_down());

        assert!(manager.trigger(ShutdownReason::Interrupt));
        assert!(!manager.trigger(ShutdownReason::Terminate));

        assert!(manager.is_shutting_down());
        assert_eq!(manager.wait().await, ShutdownReason::Interrupt);
    }

    #[tokio::test]
    async fn waiters_are_released_by_a_later_trigger() {
        let manager = ShutdownManager::new();
        let waiter = {
            let m = manager.clone();
            tokio::spawn(async move { m.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.trigger(ShutdownReason::Application);

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("released")
            .expect("join");
        assert_eq!(reason, ShutdownReason::Application);
    }
}
