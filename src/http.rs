use reqwest::Client;

use crate::config::BackendConfig;

/// 后端 worker 调用共用的 HTTP Client（统一连接池/Keep-Alive）。
///
/// 单次尝试的超时由 `backend.request_timeout_secs` 决定，超时按瞬时错误参与重试。
pub fn build_backend_client(cfg: &BackendConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(cfg.request_timeout())
        .connect_timeout(cfg.connect_timeout())
        .user_agent(concat!("imagegen-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
}
