use utoipa::openapi::server::{ServerBuilder, ServerVariableBuilder};
use utoipa::{Modify, OpenApi};

/// 提供“业务接口前缀”的 Servers 配置。
///
/// - `/image`、`/workers`、`/metrics` 挂载在 `config.api.prefix`（默认 `/api/v1`）下。
/// - `/health`、`/register`、`/prompt/{prompt}` 不带前缀，因此额外提供 `/` 作为备用 server。
struct ApiServers;

impl Modify for ApiServers {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let api = ServerBuilder::new()
            .url("{api_prefix}")
            .description(Some("业务接口（默认 /api/v1）"))
            .parameter(
                "api_prefix",
                ServerVariableBuilder::new()
                    .default_value("/api/v1")
                    .description(Some(
                        "业务接口前缀：对应 config.api.prefix（可通过 APP_API__PREFIX 覆盖）",
                    )),
            )
            .build();

        let root = ServerBuilder::new()
            .url("/")
            .description(Some("根路径（/health、/register、/prompt）"))
            .build();

        openapi.servers = Some(vec![api, root]);
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::health_check,
        crate::features::health::handler::get_metrics,
        crate::features::health::handler::reset_metrics,
        crate::features::render::handler::post_image,
        crate::features::render::handler::get_prompt_image,
        crate::features::registry::handler::register_worker,
        crate::features::registry::handler::list_workers,
    ),
    components(schemas(
        crate::error::ProblemDetails,
        crate::features::registry::ModelFamily,
        crate::features::registry::WorkerLoadSnapshot,
        crate::features::registry::handler::RegisterRequest,
        crate::features::registry::handler::WorkersResponse,
        crate::features::registry::handler::WorkerView,
        crate::features::render::handler::ImageRequest,
        crate::features::safety::SafetyVerdict,
        crate::metrics::MetricsSnapshot,
    )),
    modifiers(&ApiServers),
    tags(
        (
            name = "Render",
            description = "图片生成：分发到负载最低的 worker，按安全判定叠加 Logo 并缩放到请求尺寸。"
        ),
        (name = "Registry", description = "worker 注册表：心跳登记与快照查询。"),
        (name = "Health", description = "健康检查与后端调用指标。"),
    ),
    info(
        title = "Imagegen Gateway API",
        version = env!("CARGO_PKG_VERSION"),
        description = "图片生成网关 API（Axum + utoipa）。注意：/image、/workers、/metrics 实际挂载在 `config.api.prefix`（默认 /api/v1）下，OpenAPI 的 paths 不包含该前缀。"
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_render_and_registry_paths() {
        let doc = ApiDoc::openapi();
        for path in ["/image", "/prompt/{prompt}", "/register", "/workers", "/health"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
