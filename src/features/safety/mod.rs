use serde::Serialize;

use crate::features::invoker::RenderResult;

/// 特殊类别分数阈值：任一分数严格大于该值即判定为疑似未成年人内容
pub const MINOR_SCORE_THRESHOLD: f64 = -0.05;

/// 安全判定结果（派生值，不持久化）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SafetyVerdict {
    pub is_mature: bool,
    pub is_minor_subject: bool,
}

impl SafetyVerdict {
    /// 是否需要强制叠加受限 Logo
    pub fn is_restricted(&self) -> bool {
        self.is_mature || self.is_minor_subject
    }
}

/// 根据后端返回的安全信号计算判定。纯函数，不做任何网络调用。
///
/// 不提供安全信号的后端（simpleParametric）按安全处理。
pub fn evaluate(result: &RenderResult) -> SafetyVerdict {
    let is_mature = result.safety.has_unsafe_content.unwrap_or(false);
    let is_minor_subject = result
        .safety
        .special_scores
        .as_ref()
        .is_some_and(|scores| scores.values().any(|&s| s > MINOR_SCORE_THRESHOLD));

    if is_mature || is_minor_subject {
        tracing::warn!(is_mature, is_minor_subject, "安全判定命中");
    }

    SafetyVerdict {
        is_mature,
        is_minor_subject,
    }
}
