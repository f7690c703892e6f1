use axum::Router;
use axum::response::Json;
use axum::routing::get;
use tower_http::compression::CompressionLayer;
use utoipa::OpenApi;

use crate::caller::caller_middleware;
use crate::features::{health, registry, render};
use crate::openapi::ApiDoc;
use crate::state::AppState;

fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    // 只压缩 JSON/文本；PNG 本身已压缩
    SizeAbove::default()
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("application/octet-stream"))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// 装配全部路由与全局中间件
pub fn build_app(state: AppState, api_prefix: &str) -> Router {
    let api_router = Router::<AppState>::new()
        .merge(render::create_render_router())
        .merge(registry::create_registry_router())
        .merge(health::create_metrics_router());

    Router::<AppState>::new()
        .merge(health::create_health_router())
        .merge(registry::create_feed_router())
        .merge(render::create_prompt_router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest(api_prefix, api_router)
        .with_state(state)
        .layer(axum::middleware::from_fn(caller_middleware))
        .layer(CompressionLayer::new().compress_when(compression_predicate()))
}
