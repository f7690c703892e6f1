use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use moka::future::Cache;
use sha2::{Digest, Sha256};

use super::job::RenderJob;
use super::orchestrator::FinalArtifact;
use crate::config::CacheConfig;
use crate::error::DispatchError;

/// 成品缓存（按图片字节大小加权）。只缓存成功的成品。
#[derive(Clone)]
pub struct ArtifactCache {
    inner: Option<Cache<String, FinalArtifact>>,
}

impl ArtifactCache {
    pub fn from_config(cfg: &CacheConfig) -> Self {
        if !cfg.enabled {
            return Self::disabled();
        }
        let inner = Cache::builder()
            .weigher(|_k, v: &FinalArtifact| {
                u32::try_from(v.image_bytes.len()).unwrap_or(u32::MAX)
            })
            .max_capacity(cfg.max_bytes)
            .time_to_live(Duration::from_secs(cfg.ttl_secs))
            .build();
        Self { inner: Some(inner) }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// 缓存键：清洗后的提示词 + 渲染参数的 SHA-256
    pub fn key_for(job: &RenderJob) -> String {
        let params = job.params();
        let mut hasher = Sha256::new();
        hasher.update(job.sanitized_prompt().as_bytes());
        hasher.update([0u8]);
        hasher.update(params.width.to_le_bytes());
        hasher.update(params.height.to_le_bytes());
        hasher.update(params.seed.to_le_bytes());
        hasher.update(params.model.as_bytes());
        hasher.update([0u8]);
        match params.negative_prompt.as_deref() {
            Some(np) => {
                hasher.update([1u8]);
                hasher.update(np.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update([u8::from(params.logo)]);
        hex::encode(hasher.finalize())
    }

    /// 命中直接返回；未命中时执行 `render` 并写入缓存。
    ///
    /// 同一键的并发请求只会执行一次 `render`，其余请求等待其结果。
    /// 返回值第二项为 `true` 表示结果来自缓存（包括等待他人渲染完成）。
    pub async fn get_or_render<F>(
        &self,
        key: String,
        render: F,
    ) -> Result<(FinalArtifact, bool), DispatchError>
    where
        F: Future<Output = Result<FinalArtifact, DispatchError>>,
    {
        let Some(cache) = &self.inner else {
            return render.await.map(|artifact| (artifact, false));
        };

        let rendered_here = AtomicBool::new(false);
        let artifact = cache
            .try_get_with(key, async {
                rendered_here.store(true, Ordering::Relaxed);
                render.await
            })
            .await
            .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(|shared| (*shared).clone()))?;
        Ok((artifact, !rendered_here.load(Ordering::Relaxed)))
    }
}
