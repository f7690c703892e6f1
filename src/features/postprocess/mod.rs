//! 成品后处理流水线
//!
//! 固定顺序：选择 Logo -> 叠加 -> 缩放到请求尺寸 -> 写入元数据。
//! 叠加失败终止本次渲染；元数据写入失败只记日志，返回缩放后的图片。

pub mod logo;
pub mod metadata;
pub mod transform;

use std::sync::Arc;

use crate::error::DispatchError;
use crate::features::invoker::RenderResult;
use crate::features::render::job::RenderJob;
use crate::features::safety::SafetyVerdict;

pub use logo::{LogoAssets, LogoVariant, select_logo};
pub use metadata::{ArtifactMetadata, MetadataError, MetadataWriter, PngTextWriter};
pub use transform::{ImageTransformer, RasterTransformer, TransformError};

pub struct PostProcessor {
    transformer: Arc<dyn ImageTransformer>,
    metadata: Arc<dyn MetadataWriter>,
    logos: Arc<LogoAssets>,
}

impl PostProcessor {
    pub fn new(
        transformer: Arc<dyn ImageTransformer>,
        metadata: Arc<dyn MetadataWriter>,
        logos: Arc<LogoAssets>,
    ) -> Self {
        Self {
            transformer,
            metadata,
            logos,
        }
    }

    /// 默认实现：`image` crate 变换 + PNG iTXt 元数据
    pub fn with_defaults(logos: LogoAssets, logo_scale: f32) -> Self {
        Self::new(
            Arc::new(RasterTransformer::new(logo_scale)),
            Arc::new(PngTextWriter),
            Arc::new(logos),
        )
    }

    /// 同步执行全部阶段（CPU 密集）
    pub fn run(
        &self,
        job: &RenderJob,
        result: RenderResult,
        verdict: SafetyVerdict,
    ) -> Result<Vec<u8>, DispatchError> {
        let params = job.params();
        let variant = select_logo(&verdict, params);

        let composed = match self.logos.asset(variant) {
            None => result.image_bytes,
            Some(logo) => self
                .transformer
                .overlay(&result.image_bytes, logo, params)
                .map_err(|e| DispatchError::OverlayFailure(format!("{variant:?}: {e}")))?,
        };

        let resized = self
            .transformer
            .resize(&composed, params.width, params.height)
            .map_err(|e| DispatchError::Transform(e.to_string()))?;

        let meta = ArtifactMetadata {
            prompt: job.sanitized_prompt().to_string(),
            original_prompt: job.prompt().to_string(),
            params: params.clone(),
            safety: verdict,
            backend: result.auxiliary,
        };
        match self.metadata.write(&resized, &meta) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::warn!("写入图片元数据失败，返回未带元数据的图片: {e}");
                Ok(resized)
            }
        }
    }
}
