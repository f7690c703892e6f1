use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use tokio::sync::Semaphore;
use tracing::Instrument;

use super::job::RenderJob;
use crate::caller::CallerContext;
use crate::error::DispatchError;
use crate::features::invoker::{BackendRequest, Invoker};
use crate::features::postprocess::PostProcessor;
use crate::features::registry::ModelRegistry;
use crate::features::safety;
use crate::metrics::BackendMetrics;

/// 单次渲染请求的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Dispatch,
    Invoke,
    Evaluate,
    PostProcess,
    Done,
    Failed,
}

impl RenderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStage::Dispatch => "dispatch",
            RenderStage::Invoke => "invoke",
            RenderStage::Evaluate => "evaluate",
            RenderStage::PostProcess => "post_process",
            RenderStage::Done => "done",
            RenderStage::Failed => "failed",
        }
    }
}

/// 返回给调用方的最终成品
#[derive(Debug, Clone)]
pub struct FinalArtifact {
    pub image_bytes: Bytes,
    pub is_child: bool,
    pub is_mature: bool,
}

/// 渲染编排器：Dispatch -> Invoke -> Evaluate -> PostProcess -> Done。
///
/// 进入 Evaluate 之后不再重试，任一阶段失败都直接返回错误，不会返回半成品。
pub struct Orchestrator {
    models: Arc<ModelRegistry>,
    invoker: Invoker,
    postprocess: Arc<PostProcessor>,
    /// 限制并发的 CPU 密集后处理任务数
    permits: Arc<Semaphore>,
    metrics: Arc<BackendMetrics>,
}

impl Orchestrator {
    pub fn new(
        models: Arc<ModelRegistry>,
        invoker: Invoker,
        postprocess: PostProcessor,
        max_parallel: usize,
        metrics: Arc<BackendMetrics>,
    ) -> Self {
        Self {
            models,
            invoker,
            postprocess: Arc::new(postprocess),
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
            metrics,
        }
    }

    pub async fn render(
        &self,
        job: RenderJob,
        caller: &CallerContext,
    ) -> Result<FinalArtifact, DispatchError> {
        let span = tracing::info_span!(
            "render",
            request_id = %caller.request_id,
            caller = %caller.caller,
            model = %job.params().model,
        );
        let t_total = Instant::now();
        let result = self.run(job).instrument(span.clone()).await;
        self.metrics.record_render(result.is_ok());

        let _enter = span.enter();
        match &result {
            Ok(artifact) => tracing::info!(
                target: "render_performance",
                "渲染完成，字节大小: {}, is_child: {}, is_mature: {}, 总耗时: {}ms",
                artifact.image_bytes.len(),
                artifact.is_child,
                artifact.is_mature,
                t_total.elapsed().as_millis()
            ),
            Err(e) => tracing::warn!(
                target: "render_performance",
                "渲染失败，总耗时: {}ms: {e}",
                t_total.elapsed().as_millis()
            ),
        }
        result
    }

    async fn run(&self, job: RenderJob) -> Result<FinalArtifact, DispatchError> {
        let mut stage = RenderStage::Dispatch;
        let descriptor = self
            .models
            .resolve(&job.params().model)
            .map_err(|e| failed(stage, e))?;
        let request = BackendRequest::for_job(descriptor.family, &job);
        tracing::debug!(
            family = %descriptor.family,
            concurrency_hint = job.concurrency_hint(),
            "已选择调用策略"
        );

        stage = advance(stage, RenderStage::Invoke);
        let result = self
            .invoker
            .invoke(&request)
            .await
            .map_err(|e| failed(stage, e))?;

        stage = advance(stage, RenderStage::Evaluate);
        let verdict = safety::evaluate(&result);

        stage = advance(stage, RenderStage::PostProcess);
        let t_wait = Instant::now();
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| failed(stage, DispatchError::Internal(format!("获取后处理信号量失败: {e}"))))?;
        tracing::debug!(
            target: "render_performance",
            "后处理许可获取完成，等待: {}ms",
            t_wait.elapsed().as_millis()
        );

        let t_post = Instant::now();
        let pipeline = self.postprocess.clone();
        // 许可随阻塞任务一起移动：调用方放弃请求后，后处理仍会跑完并占住名额
        let image_bytes = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            pipeline.run(&job, result, verdict)
        })
        .await
        .map_err(|e| failed(stage, DispatchError::Internal(format!("后处理任务执行失败: {e}"))))?
        .map_err(|e| failed(stage, e))?;
        tracing::info!(
            target: "render_performance",
            "后处理完成，字节大小: {}, 耗时: {}ms",
            image_bytes.len(),
            t_post.elapsed().as_millis()
        );

        advance(stage, RenderStage::Done);
        Ok(FinalArtifact {
            image_bytes: Bytes::from(image_bytes),
            is_child: verdict.is_minor_subject,
            is_mature: verdict.is_mature,
        })
    }
}

fn advance(from: RenderStage, to: RenderStage) -> RenderStage {
    tracing::trace!("阶段 {} -> {}", from.as_str(), to.as_str());
    to
}

fn failed(stage: RenderStage, err: DispatchError) -> DispatchError {
    tracing::debug!(
        "阶段 {} -> {}: {err}",
        stage.as_str(),
        RenderStage::Failed.as_str()
    );
    err
}
