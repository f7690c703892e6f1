use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 调用方上下文：只用于日志归因，不参与路由
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub request_id: String,
    /// 客户端地址的去敏哈希
    pub caller: String,
}

impl CallerContext {
    /// 当前任务绑定的上下文；不在请求作用域内时返回匿名上下文
    pub fn current() -> Self {
        TASK_CALLER.try_with(|c| c.clone()).unwrap_or_else(|_| Self {
            request_id: "-".to_string(),
            caller: ANONYMOUS.to_string(),
        })
    }
}

const ANONYMOUS: &str = "anonymous";

tokio::task_local! {
    static TASK_CALLER: CallerContext;
}

/// 获取当前请求上下文中的 request_id。
pub fn current_request_id() -> Option<String> {
    TASK_CALLER.try_with(|c| c.request_id.clone()).ok()
}

fn is_valid_request_id(v: &str) -> bool {
    !v.is_empty()
        && v.len() <= 128
        && v.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}

fn resolve_request_id(req: &Request) -> String {
    if let Some(raw) = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        && is_valid_request_id(raw)
    {
        return raw.to_string();
    }
    format!("req_{}", Uuid::new_v4().simple())
}

/// 客户端地址：优先 `X-Forwarded-For` 的第一个地址，其次 `X-Real-IP`，最后是连接对端地址
fn client_addr(req: &Request) -> Option<String> {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

/// SHA-256 后取前 16 个十六进制字符
pub fn hash_caller(addr: &str) -> String {
    let digest = Sha256::digest(addr.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}

/// 全局调用方中间件：
/// - 透传或生成 `X-Request-Id` 并回写到响应头
/// - 计算调用方哈希，与 request_id 一起注入任务上下文供日志和错误响应使用
pub async fn caller_middleware(req: Request, next: Next) -> Response {
    let request_id = resolve_request_id(&req);
    let caller = client_addr(&req)
        .map(|a| hash_caller(&a))
        .unwrap_or_else(|| ANONYMOUS.to_string());
    let ctx = CallerContext {
        request_id: request_id.clone(),
        caller,
    };

    let mut res = TASK_CALLER.scope(ctx, next.run(req)).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        res.headers_mut().insert("x-request-id", value);
    }
    res
}
