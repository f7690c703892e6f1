//! 进程级后端调用指标
//!
//! 进程启动时创建一次，通过 `AppState` 共享；只用于观测和外部限流决策，不参与请求放行判断。

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug)]
pub struct BackendMetrics {
    /// 统计窗口起点（进程启动或最近一次 reset）
    window_start: Mutex<Instant>,
    fetch_micros: AtomicU64,
    attempts: AtomicU64,
    failed_attempts: AtomicU64,
    renders_ok: AtomicU64,
    renders_failed: AtomicU64,
}

/// 指标快照
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub uptime_ms: u64,
    pub fetch_ms: u64,
    /// 后端调用耗时占运行时长的百分比
    pub fetch_percentage: f64,
    pub attempts: u64,
    pub failed_attempts: u64,
    pub renders_ok: u64,
    pub renders_failed: u64,
}

impl Default for BackendMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendMetrics {
    pub fn new() -> Self {
        Self {
            window_start: Mutex::new(Instant::now()),
            fetch_micros: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            renders_ok: AtomicU64::new(0),
            renders_failed: AtomicU64::new(0),
        }
    }

    /// 记录一次后端尝试
    pub fn record_attempt(&self, elapsed: Duration, ok: bool) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.fetch_micros.fetch_add(micros, Ordering::Relaxed);
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 记录一次完整渲染请求的结果
    pub fn record_render(&self, ok: bool) {
        if ok {
            self.renders_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.renders_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn uptime(&self) -> Duration {
        self.window_start
            .lock()
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.uptime();
        let fetch = Duration::from_micros(self.fetch_micros.load(Ordering::Relaxed));
        let fetch_percentage = if uptime.is_zero() {
            0.0
        } else {
            fetch.as_secs_f64() / uptime.as_secs_f64() * 100.0
        };
        MetricsSnapshot {
            uptime_ms: uptime.as_millis() as u64,
            fetch_ms: fetch.as_millis() as u64,
            fetch_percentage,
            attempts: self.attempts.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            renders_ok: self.renders_ok.load(Ordering::Relaxed),
            renders_failed: self.renders_failed.load(Ordering::Relaxed),
        }
    }

    /// 清零计数并重新开始统计窗口
    pub fn reset(&self) {
        if let Ok(mut start) = self.window_start.lock() {
            *start = Instant::now();
        }
        self.fetch_micros.store(0, Ordering::Relaxed);
        self.attempts.store(0, Ordering::Relaxed);
        self.failed_attempts.store(0, Ordering::Relaxed);
        self.renders_ok.store(0, Ordering::Relaxed);
        self.renders_failed.store(0, Ordering::Relaxed);
    }
}
