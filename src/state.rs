use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::features::invoker::{Invoker, Pause, TokioPause};
use crate::features::postprocess::{LogoAssets, PostProcessor};
use crate::features::registry::{ModelRegistry, RegistryFeed, WorkerRegistry};
use crate::features::render::{ArtifactCache, Orchestrator};
use crate::http::build_backend_client;
use crate::metrics::BackendMetrics;

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 请求未指定模型时使用
    pub default_model: Arc<str>,
    pub models: Arc<ModelRegistry>,
    /// worker 快照表只读视图
    pub workers: WorkerRegistry,
    /// worker 快照表写入端（心跳接口使用）
    pub registry_feed: RegistryFeed,
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Arc<BackendMetrics>,
    /// 成品缓存（按图片字节大小加权）
    pub cache: ArtifactCache,
    /// 进程内正在处理的渲染请求数
    pub in_flight: Arc<AtomicUsize>,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::from_config_with_pause(config, Arc::new(TokioPause))
    }

    /// 可替换退避等待实现的构建方式
    pub fn from_config_with_pause(
        config: &AppConfig,
        pause: Arc<dyn Pause>,
    ) -> Result<Self, AppError> {
        let metrics = Arc::new(BackendMetrics::new());
        let models = Arc::new(ModelRegistry::new(config.models.registered.iter().cloned()));
        let (workers, registry_feed) = WorkerRegistry::from_config(&config.registry);

        let client = build_backend_client(&config.backend)
            .map_err(|e| AppError::Internal(format!("HTTP Client 初始化失败: {e}")))?;
        let invoker = Invoker::new(client, workers.clone(), metrics.clone(), &config.backend)
            .with_pause(pause);

        let logos = LogoAssets::from_config(&config.postprocess)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let postprocess = PostProcessor::with_defaults(logos, config.postprocess.logo_scale);

        let orchestrator = Orchestrator::new(
            models.clone(),
            invoker,
            postprocess,
            config.postprocess.effective_parallelism(),
            metrics.clone(),
        );

        Ok(Self {
            default_model: Arc::from(config.models.default_model.as_str()),
            models,
            workers,
            registry_feed,
            orchestrator: Arc::new(orchestrator),
            metrics,
            cache: ArtifactCache::from_config(&config.cache),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }
}
