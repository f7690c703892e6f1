use axum::http::header;
use serde::Serialize;

use super::{RenderResult, SafetySignal, truncate_for_log};
use crate::error::DispatchError;
use crate::features::render::job::RenderJob;

/// 宽高比字符串，直接取 `W:H`
pub fn closest_aspect_ratio(width: u32, height: u32) -> String {
    format!("{width}:{height}")
}

/// simpleParametric worker 的 query 参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleParametricQuery {
    pub prompt: String,
    pub size: String,
    pub seed: i64,
    pub model: String,
}

impl SimpleParametricQuery {
    pub fn from_job(job: &RenderJob) -> Self {
        let params = job.params();
        Self {
            prompt: job.sanitized_prompt().to_string(),
            size: closest_aspect_ratio(params.width, params.height),
            seed: params.seed,
            model: params.model.clone(),
        }
    }
}

pub(crate) async fn send(
    client: &reqwest::Client,
    url: &str,
    query: &SimpleParametricQuery,
) -> Result<RenderResult, DispatchError> {
    let response = client.get(url).query(query).send().await?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DispatchError::transient(format!(
            "worker 返回 {status}: {}",
            truncate_for_log(&body)
        )));
    }
    // 成功状态码下返回文本/JSON 说明 worker 给出的是错误信息而非图片
    if content_type.contains("text") || content_type.contains("json") {
        let body = response.text().await.unwrap_or_default();
        return Err(DispatchError::MalformedResponse(format!(
            "worker 返回了文本响应（{content_type}）: {}",
            truncate_for_log(&body)
        )));
    }

    let image_bytes = response.bytes().await?.to_vec();
    if image_bytes.is_empty() {
        return Err(DispatchError::MissingImageData);
    }

    Ok(RenderResult {
        image_bytes,
        safety: SafetySignal::default(),
        auxiliary: serde_json::Map::new(),
    })
}
