use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::cache::ArtifactCache;
use super::job::{RenderJob, RenderParams};
use super::orchestrator::FinalArtifact;
use crate::caller::CallerContext;
use crate::{error::AppError, state::AppState};

const DEFAULT_DIMENSION: u32 = 1024;
const DEFAULT_SEED: i64 = 42;

/// JSON 渲染请求
#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    #[schema(example = "a red cube")]
    pub prompt: String,
    #[serde(default)]
    #[schema(example = 1024)]
    pub width: Option<u32>,
    #[serde(default)]
    #[schema(example = 1024)]
    pub height: Option<u32>,
    #[serde(default)]
    #[schema(example = 42)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// 缺省使用配置中的默认模型
    #[serde(default)]
    pub model: Option<String>,
    /// 安全内容是否叠加普通 Logo（默认 false）
    #[serde(default)]
    pub logo: Option<bool>,
}

/// `GET /prompt/{prompt}` 的查询参数
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PromptQuery {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<i64>,
    pub model: Option<String>,
    pub negative_prompt: Option<String>,
    pub logo: Option<bool>,
}

impl From<PromptQuery> for ImageRequest {
    fn from(q: PromptQuery) -> Self {
        Self {
            prompt: String::new(),
            width: q.width,
            height: q.height,
            seed: q.seed,
            negative_prompt: q.negative_prompt,
            model: q.model,
            logo: q.logo,
        }
    }
}

impl ImageRequest {
    fn into_params(self, default_model: &str) -> (String, RenderParams) {
        let params = RenderParams {
            width: self.width.unwrap_or(DEFAULT_DIMENSION),
            height: self.height.unwrap_or(DEFAULT_DIMENSION),
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            negative_prompt: self.negative_prompt.filter(|s| !s.trim().is_empty()),
            model: self.model.unwrap_or_else(|| default_model.to_string()),
            logo: self.logo.unwrap_or(false),
        };
        (self.prompt, params)
    }
}

/// 进程内正在处理的渲染请求计数，析构时自动减一
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    /// 登记一个请求，返回准入时已在处理中的请求数
    fn enter(counter: &Arc<AtomicUsize>) -> (Self, u32) {
        let before = counter.fetch_add(1, Ordering::SeqCst);
        (
            Self(counter.clone()),
            u32::try_from(before).unwrap_or(u32::MAX),
        )
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn render(state: AppState, req: ImageRequest) -> Result<Response, AppError> {
    let (prompt, params) = req.into_params(&state.default_model);
    let job = RenderJob::new(prompt, params, 0)?;
    let key = ArtifactCache::key_for(&job);
    let short_key = key[..12].to_string();

    // 只有真正发往后端的请求才计入并发
    let orchestrator = state.orchestrator.clone();
    let in_flight = state.in_flight.clone();
    let (artifact, cached) = state
        .cache
        .get_or_render(key, async move {
            let (_guard, hint) = InFlightGuard::enter(&in_flight);
            orchestrator
                .render(job.with_concurrency_hint(hint), &CallerContext::current())
                .await
        })
        .await?;
    if cached {
        tracing::debug!("成品缓存命中: {}", short_key);
    }
    Ok(png_response(artifact, cached))
}

fn png_response(artifact: FinalArtifact, cached: bool) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert("x-is-child", bool_header(artifact.is_child));
    headers.insert("x-is-mature", bool_header(artifact.is_mature));
    headers.insert(
        "x-cache",
        HeaderValue::from_static(if cached { "HIT" } else { "MISS" }),
    );
    (headers, artifact.image_bytes).into_response()
}

fn bool_header(v: bool) -> HeaderValue {
    HeaderValue::from_static(if v { "true" } else { "false" })
}

#[utoipa::path(
    post,
    path = "/image",
    summary = "生成图片",
    description = "按提示词与参数生成 PNG。响应头 `x-is-child` / `x-is-mature` 给出安全判定，命中安全判定的图片已强制叠加受限 Logo。",
    request_body = ImageRequest,
    responses(
        (status = 200, description = "PNG 图片", content_type = "image/png", body = Vec<u8>),
        (status = 422, description = "参数错误或模型不可用", body = crate::error::ProblemDetails),
        (status = 502, description = "后端调用失败", body = crate::error::ProblemDetails),
        (status = 503, description = "没有可用的 worker", body = crate::error::ProblemDetails),
        (status = 504, description = "后端超时", body = crate::error::ProblemDetails)
    ),
    tag = "Render"
)]
pub async fn post_image(
    State(state): State<AppState>,
    Json(req): Json<ImageRequest>,
) -> Result<Response, AppError> {
    render(state, req).await
}

#[utoipa::path(
    get,
    path = "/prompt/{prompt}",
    summary = "按路径提示词生成图片",
    params(
        ("prompt" = String, Path, description = "URL 编码的提示词"),
        PromptQuery
    ),
    responses(
        (status = 200, description = "PNG 图片", content_type = "image/png", body = Vec<u8>),
        (status = 422, description = "参数错误或模型不可用", body = crate::error::ProblemDetails),
        (status = 502, description = "后端调用失败", body = crate::error::ProblemDetails),
        (status = 503, description = "没有可用的 worker", body = crate::error::ProblemDetails)
    ),
    tag = "Render"
)]
pub async fn get_prompt_image(
    State(state): State<AppState>,
    Path(prompt): Path<String>,
    Query(q): Query<PromptQuery>,
) -> Result<Response, AppError> {
    let req = ImageRequest {
        prompt,
        ..ImageRequest::from(q)
    };
    render(state, req).await
}

/// 挂载在 API 前缀下的渲染路由
pub fn create_render_router() -> Router<AppState> {
    Router::<AppState>::new().route("/image", post(post_image))
}

/// 挂载在根路径的公开渲染路由
pub fn create_prompt_router() -> Router<AppState> {
    Router::<AppState>::new().route("/prompt/:prompt", get(get_prompt_image))
}
