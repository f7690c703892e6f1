use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use chrono::Utc;
use serde::Serialize;

use crate::metrics::MetricsSnapshot;
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// 服务状态：healthy | degraded（没有任何新鲜 worker）
    #[schema(example = "healthy")]
    pub status: String,
    #[schema(example = "imagegen-gateway")]
    pub service: String,
    /// 当前版本（Cargo package version）
    #[schema(example = "0.1.0")]
    pub version: String,
    pub fresh_workers: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    summary = "健康检查",
    description = "用于探活的健康检查端点，返回服务状态、版本信息与新鲜 worker 数量。",
    responses((status = 200, description = "服务存活", body = HealthResponse)),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let now = Utc::now();
    let freshness = state.workers.freshness();
    let fresh_workers = state
        .workers
        .snapshot()
        .iter()
        .filter(|w| w.is_fresh(now, freshness))
        .count();
    let status = if fresh_workers > 0 { "healthy" } else { "degraded" };
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: status.to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            fresh_workers,
        }),
    )
}

#[utoipa::path(
    get,
    path = "/metrics",
    summary = "后端调用指标",
    description = "进程级只读指标，不参与请求放行判断。",
    responses((status = 200, description = "指标快照", body = MetricsSnapshot)),
    tag = "Health"
)]
pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// 清零计数，返回清零前的快照
#[utoipa::path(
    delete,
    path = "/metrics",
    summary = "重置后端调用指标",
    responses((status = 200, description = "重置前的指标快照", body = MetricsSnapshot)),
    tag = "Health"
)]
pub async fn reset_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    let before = state.metrics.snapshot();
    state.metrics.reset();
    tracing::info!("后端调用指标已重置");
    Json(before)
}

pub fn create_health_router() -> Router<AppState> {
    Router::<AppState>::new().route("/health", get(health_check))
}

/// 挂载在 API 前缀下
pub fn create_metrics_router() -> Router<AppState> {
    Router::<AppState>::new().route("/metrics", get(get_metrics).delete(reset_metrics))
}
