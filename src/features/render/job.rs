use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::features::invoker::sanitize::sanitize_prompt;

/// 单边最大像素
pub const MAX_DIMENSION: u32 = 2048;

/// 渲染参数（调用方请求的原始参数，元数据中原样写入）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderParams {
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub model: String,
    /// 安全内容是否叠加普通 Logo
    #[serde(default)]
    pub logo: bool,
}

/// 一次渲染任务。构造后不可变，由编排器独占持有。
#[derive(Debug, Clone)]
pub struct RenderJob {
    prompt: String,
    sanitized_prompt: String,
    params: RenderParams,
    concurrency_hint: u32,
}

impl RenderJob {
    /// 校验宽高并清洗提示词
    pub fn new(
        prompt: impl Into<String>,
        params: RenderParams,
        concurrency_hint: u32,
    ) -> Result<Self, DispatchError> {
        let prompt = prompt.into();
        if params.width == 0 || params.height == 0 {
            return Err(DispatchError::InvalidJob(format!(
                "宽高必须大于 0（{}x{}）",
                params.width, params.height
            )));
        }
        if params.width > MAX_DIMENSION || params.height > MAX_DIMENSION {
            return Err(DispatchError::InvalidJob(format!(
                "宽高不能超过 {MAX_DIMENSION}（{}x{}）",
                params.width, params.height
            )));
        }
        let sanitized_prompt = sanitize_prompt(&prompt);
        if sanitized_prompt.is_empty() {
            return Err(DispatchError::InvalidJob("提示词为空".to_string()));
        }
        Ok(Self {
            prompt,
            sanitized_prompt,
            params,
            concurrency_hint,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn sanitized_prompt(&self) -> &str {
        &self.sanitized_prompt
    }

    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    pub fn concurrency_hint(&self) -> u32 {
        self.concurrency_hint
    }

    /// 准入时再填入并发提示（缓存键不含该值）
    pub fn with_concurrency_hint(mut self, hint: u32) -> Self {
        self.concurrency_hint = hint;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(width: u32, height: u32) -> RenderParams {
        RenderParams {
            width,
            height,
            seed: 42,
            negative_prompt: None,
            model: "flux".into(),
            logo: false,
        }
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(matches!(
            RenderJob::new("cat", params(0, 512), 0),
            Err(DispatchError::InvalidJob(_))
        ));
        assert!(matches!(
            RenderJob::new("cat", params(512, 0), 0),
            Err(DispatchError::InvalidJob(_))
        ));
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        assert!(RenderJob::new("cat", params(MAX_DIMENSION + 1, 512), 0).is_err());
    }

    #[test]
    fn prompt_is_sanitized_but_original_is_kept() {
        let job = RenderJob::new("  a   red cube ", params(512, 512), 5).expect("job");
        assert_eq!(job.prompt(), "  a   red cube ");
        assert_eq!(job.sanitized_prompt(), "a red cube");
        assert_eq!(job.concurrency_hint(), 5);
    }

    #[test]
    fn concurrency_hint_can_be_filled_in_later() {
        let job = RenderJob::new("cat", params(64, 64), 0)
            .expect("job")
            .with_concurrency_hint(17);
        assert_eq!(job.concurrency_hint(), 17);
        assert_eq!(job.sanitized_prompt(), "cat");
    }

    #[test]
    fn blank_prompt_is_rejected() {
        assert!(RenderJob::new(" \u{0000} ", params(64, 64), 0).is_err());
    }
}
