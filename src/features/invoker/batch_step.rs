use base64::{Engine as _, engine::general_purpose};
use serde::Serialize;
use serde_json::Value;

use super::{RenderResult, SafetySignal, truncate_for_log};
use crate::error::DispatchError;
use crate::features::render::job::RenderJob;

/// 按当前并发量选择步数：负载越高步数越少，以画质换延迟
pub fn steps_for_concurrency(concurrency: u32) -> u32 {
    match concurrency {
        0..=11 => 4,
        12..=17 => 3,
        18..=27 => 2,
        _ => 1,
    }
}

/// batchStep worker 的请求体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStepPayload {
    pub prompts: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub steps: u32,
}

impl BatchStepPayload {
    pub fn from_job(job: &RenderJob) -> Self {
        let params = job.params();
        Self {
            prompts: vec![job.sanitized_prompt().to_string()],
            width: params.width,
            height: params.height,
            seed: params.seed,
            negative_prompt: params.negative_prompt.clone(),
            steps: steps_for_concurrency(job.concurrency_hint()),
        }
    }
}

pub(crate) async fn send(
    client: &reqwest::Client,
    url: &str,
    payload: &BatchStepPayload,
) -> Result<RenderResult, DispatchError> {
    let response = client.post(url).json(payload).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DispatchError::transient(format!(
            "worker 返回 {status}: {}",
            truncate_for_log(&body)
        )));
    }

    let body = response.bytes().await?;
    parse_response(&body)
}

/// 解析 worker 响应：对象或单元素数组，必须包含 base64 的 `image` 字段
pub(crate) fn parse_response(body: &[u8]) -> Result<RenderResult, DispatchError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| DispatchError::MalformedResponse(format!("JSON 解析失败: {e}")))?;

    let value = match value {
        Value::Array(items) => items
            .into_iter()
            .next()
            .ok_or_else(|| DispatchError::MalformedResponse("响应为空数组".to_string()))?,
        other => other,
    };
    let Value::Object(mut fields) = value else {
        return Err(DispatchError::MalformedResponse(
            "响应不是 JSON 对象".to_string(),
        ));
    };

    let encoded = match fields.remove("image") {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        _ => return Err(DispatchError::MissingImageData),
    };
    let image_bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| DispatchError::MalformedResponse(format!("image 字段不是合法 base64: {e}")))?;

    let has_unsafe_content = fields.get("has_nsfw_concept").and_then(Value::as_bool);
    let special_scores = fields
        .get("concept")
        .and_then(|c| c.get("special_scores"))
        .and_then(Value::as_object)
        .map(|scores| {
            scores
                .iter()
                .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                .collect()
        });

    Ok(RenderResult {
        image_bytes,
        safety: SafetySignal {
            has_unsafe_content,
            special_scores,
        },
        auxiliary: fields,
    })
}
