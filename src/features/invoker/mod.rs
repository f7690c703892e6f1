pub mod batch_step;
pub mod retry;
pub mod sanitize;
pub mod simple_parametric;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::BackendConfig;
use crate::error::DispatchError;
use crate::features::registry::{ModelFamily, WorkerRegistry};
use crate::features::render::job::RenderJob;
use crate::metrics::BackendMetrics;

pub use batch_step::{BatchStepPayload, steps_for_concurrency};
pub use retry::{Pause, PauseFuture, RetryPolicy, TokioPause, run_with_retry};
pub use simple_parametric::{SimpleParametricQuery, closest_aspect_ratio};

/// 后端返回的安全信号（可能缺失）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SafetySignal {
    pub has_unsafe_content: Option<bool>,
    /// 类别 -> 分数（通常为负对数似然）
    pub special_scores: Option<BTreeMap<String, f64>>,
}

/// 一次成功的后端渲染结果
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub image_bytes: Vec<u8>,
    pub safety: SafetySignal,
    /// 除图片外的其余响应字段，原样写入元数据
    pub auxiliary: serde_json::Map<String, serde_json::Value>,
}

/// 按 family 区分的后端请求
#[derive(Debug, Clone, PartialEq)]
pub enum BackendRequest {
    BatchStep(BatchStepPayload),
    SimpleParametric(SimpleParametricQuery),
}

impl BackendRequest {
    pub fn for_job(family: ModelFamily, job: &RenderJob) -> Self {
        match family {
            ModelFamily::BatchStep => BackendRequest::BatchStep(BatchStepPayload::from_job(job)),
            ModelFamily::SimpleParametric => {
                BackendRequest::SimpleParametric(SimpleParametricQuery::from_job(job))
            }
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            BackendRequest::BatchStep(_) => ModelFamily::BatchStep,
            BackendRequest::SimpleParametric(_) => ModelFamily::SimpleParametric,
        }
    }
}

/// 后端调用器：每次尝试都重新选择负载最低的 worker，batchStep 按策略重试
pub struct Invoker {
    client: reqwest::Client,
    workers: WorkerRegistry,
    metrics: Arc<BackendMetrics>,
    pause: Arc<dyn Pause>,
    retry: RetryPolicy,
    batch_step_path: String,
    simple_parametric_path: String,
}

impl Invoker {
    pub fn new(
        client: reqwest::Client,
        workers: WorkerRegistry,
        metrics: Arc<BackendMetrics>,
        cfg: &BackendConfig,
    ) -> Self {
        Self {
            client,
            workers,
            metrics,
            pause: Arc::new(TokioPause),
            retry: RetryPolicy::new(cfg.max_attempts, cfg.backoff_base()),
            batch_step_path: cfg.batch_step_path.clone(),
            simple_parametric_path: cfg.simple_parametric_path.clone(),
        }
    }

    /// 替换退避等待实现
    pub fn with_pause(mut self, pause: Arc<dyn Pause>) -> Self {
        self.pause = pause;
        self
    }

    pub fn retry_policy(&self, family: ModelFamily) -> RetryPolicy {
        match family {
            ModelFamily::BatchStep => self.retry,
            ModelFamily::SimpleParametric => RetryPolicy::single_shot(),
        }
    }

    pub async fn invoke(&self, request: &BackendRequest) -> Result<RenderResult, DispatchError> {
        let policy = self.retry_policy(request.family());
        let result = run_with_retry(policy, self.pause.as_ref(), |attempt| {
            self.attempt(request, attempt)
        })
        .await;

        let snapshot = self.metrics.snapshot();
        tracing::debug!(
            target: "render_performance",
            "后端耗时占比: {:.2}%（累计 {}ms / 运行 {}ms）",
            snapshot.fetch_percentage,
            snapshot.fetch_ms,
            snapshot.uptime_ms
        );
        result
    }

    async fn attempt(
        &self,
        request: &BackendRequest,
        attempt: u32,
    ) -> Result<RenderResult, DispatchError> {
        let worker = self.workers.select_worker(request.family())?;

        let started = Instant::now();
        let result = match request {
            BackendRequest::BatchStep(payload) => {
                let url = join_url(&worker.endpoint, &self.batch_step_path);
                batch_step::send(&self.client, &url, payload).await
            }
            BackendRequest::SimpleParametric(query) => {
                let url = join_url(&worker.endpoint, &self.simple_parametric_path);
                simple_parametric::send(&self.client, &url, query).await
            }
        };
        let elapsed = started.elapsed();
        self.metrics.record_attempt(elapsed, result.is_ok());

        match &result {
            Ok(r) => tracing::info!(
                target: "render_performance",
                worker = %worker.worker_id,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                bytes = r.image_bytes.len(),
                "后端调用完成"
            ),
            Err(e) => tracing::warn!(
                target: "render_performance",
                worker = %worker.worker_id,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                "后端调用失败: {e}"
            ),
        }
        result
    }
}

fn join_url(endpoint: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    format!("{}/{}", endpoint.trim_end_matches('/'), path)
}

/// 日志里只保留响应体前 200 个字符
pub(crate) fn truncate_for_log(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(join_url("http://w:5002/", "/generate"), "http://w:5002/generate");
        assert_eq!(join_url("http://w:5002", "generate"), "http://w:5002/generate");
    }

    #[test]
    fn simple_parametric_is_single_shot() {
        let (workers, _feed) = WorkerRegistry::new(std::time::Duration::from_secs(60));
        let invoker = Invoker::new(
            reqwest::Client::new(),
            workers,
            Arc::new(BackendMetrics::new()),
            &BackendConfig::default(),
        );
        assert_eq!(invoker.retry_policy(ModelFamily::SimpleParametric).max_attempts, 1);
        assert_eq!(invoker.retry_policy(ModelFamily::BatchStep).max_attempts, 3);
    }

    #[test]
    fn long_bodies_are_truncated_for_logs() {
        let body = "é".repeat(500);
        let t = truncate_for_log(&body);
        assert_eq!(t.chars().count(), 201);
    }
}
