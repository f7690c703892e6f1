use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::features::registry::models::ModelFamily;

/// 应用统一错误类型（HTTP 层）
#[derive(Error, Debug)]
pub enum AppError {
    /// 参数校验错误
    #[error("参数校验错误: {0}")]
    Validation(String),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 渲染调度错误
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// 渲染调度链路上的错误。
///
/// 只有 [`DispatchError::BackendTransient`] 会被重试，其余错误一旦出现即终止本次请求。
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// 请求的 family 下没有新鲜的 worker
    #[error("没有可用的 worker（family = {family}）")]
    NoWorkerAvailable { family: ModelFamily },

    /// 渲染参数不合法（宽高为 0、提示词为空等）
    #[error("渲染参数不合法: {0}")]
    InvalidJob(String),

    /// 未注册的模型
    #[error("未注册的模型: {0}")]
    UnknownModel(String),

    /// 模型已停用
    #[error("模型已停用: {0}")]
    ModelDisabled(String),

    /// 非 2xx、网络错误或超时
    #[error("后端瞬时错误: {message}")]
    BackendTransient { message: String, timeout: bool },

    /// 重试耗尽；`timeout` 取最后一次尝试是否超时
    #[error("后端重试耗尽（共 {attempts} 次）: {last}")]
    BackendExhausted {
        attempts: u32,
        last: String,
        timeout: bool,
    },

    /// 成功响应中缺少 image 字段
    #[error("后端响应缺少图片数据")]
    MissingImageData,

    /// 后端响应不符合契约
    #[error("后端响应格式错误: {0}")]
    MalformedResponse(String),

    /// 需要叠加 Logo 但叠加失败
    #[error("Logo 叠加失败: {0}")]
    OverlayFailure(String),

    /// 解码/缩放/编码失败
    #[error("图片变换失败: {0}")]
    Transform(String),

    /// 阻塞任务或信号量等内部故障
    #[error("内部错误: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn transient(message: impl Into<String>) -> Self {
        DispatchError::BackendTransient {
            message: message.into(),
            timeout: false,
        }
    }

    /// 是否允许按重试策略再次尝试
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::BackendTransient { .. })
    }
}

/// RFC7807 风格的错误响应（Problem Details）。
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    /// 问题类型（URI）。若无更细分的类型，可使用 about:blank。
    #[serde(rename = "type")]
    #[schema(example = "about:blank")]
    pub type_url: String,

    /// 简短标题，用于概括错误。
    #[schema(example = "Service Unavailable")]
    pub title: String,

    /// HTTP 状态码（与响应 status 一致）。
    #[schema(example = 503)]
    pub status: u16,

    /// 人类可读的详细信息（尽量稳定，不建议依赖解析）。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// 稳定的错误码，用于程序化处理。
    #[schema(example = "NO_WORKER_AVAILABLE")]
    pub code: String,

    /// 请求追踪 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Dispatch(e) => match e {
                DispatchError::NoWorkerAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DispatchError::InvalidJob(_)
                | DispatchError::UnknownModel(_)
                | DispatchError::ModelDisabled(_) => StatusCode::UNPROCESSABLE_ENTITY,
                DispatchError::BackendTransient { timeout: true, .. }
                | DispatchError::BackendExhausted { timeout: true, .. } => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                DispatchError::BackendTransient { .. }
                | DispatchError::BackendExhausted { .. }
                | DispatchError::MissingImageData
                | DispatchError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
                DispatchError::OverlayFailure(_)
                | DispatchError::Transform(_)
                | DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn stable_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Dispatch(e) => match e {
                DispatchError::NoWorkerAvailable { .. } => "NO_WORKER_AVAILABLE",
                DispatchError::InvalidJob(_) => "VALIDATION_FAILED",
                DispatchError::UnknownModel(_) => "UNKNOWN_MODEL",
                DispatchError::ModelDisabled(_) => "MODEL_DISABLED",
                DispatchError::BackendTransient { timeout: true, .. }
                | DispatchError::BackendExhausted { timeout: true, .. } => "BACKEND_TIMEOUT",
                DispatchError::BackendTransient { .. } | DispatchError::BackendExhausted { .. } => {
                    "BACKEND_EXHAUSTED"
                }
                DispatchError::MissingImageData | DispatchError::MalformedResponse(_) => {
                    "BACKEND_CONTRACT_VIOLATION"
                }
                DispatchError::OverlayFailure(_) | DispatchError::Transform(_) => {
                    "POSTPROCESS_FAILED"
                }
                DispatchError::Internal(_) => "INTERNAL_ERROR",
            },
        }
    }

    fn title(&self) -> &'static str {
        match self.status_code() {
            StatusCode::UNPROCESSABLE_ENTITY => "Validation Failed",
            StatusCode::BAD_GATEWAY => "Bad Gateway",
            StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
            StatusCode::GATEWAY_TIMEOUT => "Gateway Timeout",
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let problem = ProblemDetails {
            type_url: "about:blank".to_string(),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail: Some(self.to_string()),
            code: self.stable_code().to_string(),
            request_id: crate::caller::current_request_id(),
        };

        let mut res = Json(problem).into_response();
        *res.status_mut() = status;
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if status == StatusCode::SERVICE_UNAVAILABLE {
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
        }
        res
    }
}

// =============== Error conversions for common external errors ===============

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::BackendTransient {
            timeout: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AppError, DispatchError};
    use crate::features::registry::models::ModelFamily;
    use axum::{http::StatusCode, response::IntoResponse};
    use std::time::Duration;

    async fn start_hanging_http_server() -> std::net::SocketAddr {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind tcp listener");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    // 不返回任何 HTTP 响应，触发客户端 read timeout。
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    drop(socket);
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn dispatch_error_from_reqwest_timeout_is_retryable_timeout() {
        let addr = start_hanging_http_server().await;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("build reqwest client");

        let err = client
            .get(format!("http://{addr}/"))
            .send()
            .await
            .expect_err("expected timeout");

        let de: DispatchError = err.into();
        assert!(de.is_retryable());
        assert!(
            matches!(de, DispatchError::BackendTransient { timeout: true, .. }),
            "expected timeout flag, got: {de:?}"
        );
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(DispatchError::transient("503").is_retryable());
        assert!(!DispatchError::MissingImageData.is_retryable());
        assert!(
            !DispatchError::NoWorkerAvailable {
                family: ModelFamily::BatchStep
            }
            .is_retryable()
        );
    }

    #[test]
    fn no_worker_maps_to_service_unavailable() {
        let resp = AppError::from(DispatchError::NoWorkerAvailable {
            family: ModelFamily::BatchStep,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp.headers().get("retry-after").is_some());
    }

    #[test]
    fn exhaustion_after_timeout_maps_to_gateway_timeout() {
        let resp = AppError::from(DispatchError::BackendExhausted {
            attempts: 3,
            last: "operation timed out".into(),
            timeout: true,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);

        let resp = AppError::from(DispatchError::BackendExhausted {
            attempts: 3,
            last: "500".into(),
            timeout: false,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn contract_violation_maps_to_bad_gateway() {
        let resp = AppError::from(DispatchError::MissingImageData).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
