use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::feed::Heartbeat;
use super::models::ModelFamily;
use super::workers::WorkerLoadSnapshot;
use crate::{error::AppError, state::AppState};

/// worker 心跳请求（worker 每 30s 上报一次自身地址）
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterRequest {
    /// worker 对外地址
    #[schema(example = "http://10.0.0.3:5002")]
    pub url: String,
    /// 可选 worker 标识，缺省使用 url
    #[serde(default)]
    pub id: Option<String>,
    /// worker 实现的 family，缺省 batch_step
    #[serde(default)]
    pub family: Option<ModelFamily>,
    /// 当前负载（排队/处理中的请求数）
    #[serde(default)]
    pub load: Option<u32>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerView {
    #[serde(flatten)]
    pub snapshot: WorkerLoadSnapshot,
    pub fresh: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkersResponse {
    pub freshness_secs: u64,
    pub workers: Vec<WorkerView>,
}

fn normalize_endpoint(url: &str) -> Result<String, AppError> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AppError::Validation(format!(
            "url 必须以 http:// 或 https:// 开头: {url}"
        )));
    }
    if trimmed.len() <= "https://".len() {
        return Err(AppError::Validation("url 缺少主机部分".into()));
    }
    Ok(trimmed.to_string())
}

#[utoipa::path(
    post,
    path = "/register",
    summary = "worker 心跳注册",
    description = "worker 周期性上报自身地址与负载；同一 id 的旧快照被整体替换。",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "已登记", body = WorkerLoadSnapshot),
        (status = 422, description = "参数错误", body = crate::error::ProblemDetails)
    ),
    tag = "Registry"
)]
pub async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<WorkerLoadSnapshot>, AppError> {
    let endpoint = normalize_endpoint(&req.url)?;
    let snapshot = state.registry_feed.heartbeat(Heartbeat {
        worker_id: req.id.unwrap_or_else(|| endpoint.clone()),
        endpoint,
        family: req.family.unwrap_or(ModelFamily::BatchStep),
        load: req.load.unwrap_or(0),
    });
    tracing::info!("worker 已登记: {} ({})", snapshot.worker_id, snapshot.family);
    Ok(Json(snapshot))
}

#[utoipa::path(
    get,
    path = "/workers",
    summary = "列出已知 worker",
    responses((status = 200, description = "当前快照表", body = WorkersResponse)),
    tag = "Registry"
)]
pub async fn list_workers(State(state): State<AppState>) -> Json<WorkersResponse> {
    let now = Utc::now();
    let freshness = state.workers.freshness();
    let workers = state
        .workers
        .snapshot()
        .iter()
        .map(|w| WorkerView {
            fresh: w.is_fresh(now, freshness),
            snapshot: w.clone(),
        })
        .collect();
    Json(WorkersResponse {
        freshness_secs: freshness.as_secs(),
        workers,
    })
}

/// 挂载在 API 前缀下的查询路由
pub fn create_registry_router() -> Router<AppState> {
    Router::<AppState>::new().route("/workers", get(list_workers))
}

/// 挂载在根路径的 worker 心跳路由
pub fn create_feed_router() -> Router<AppState> {
    Router::<AppState>::new().route("/register", post(register_worker))
}

#[cfg(test)]
mod tests {
    use super::normalize_endpoint;

    #[test]
    fn endpoint_is_trimmed_and_validated() {
        assert_eq!(
            normalize_endpoint(" http://1.2.3.4:5002/ ").expect("ok"),
            "http://1.2.3.4:5002"
        );
        assert!(normalize_endpoint("ftp://x").is_err());
        assert!(normalize_endpoint("https://").is_err());
    }
}
