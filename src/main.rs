use std::net::SocketAddr;

use imagegen_gateway::config::{AppConfig, LoggingConfig};
use imagegen_gateway::state::AppState;
use imagegen_gateway::{ShutdownManager, app};
use tracing_subscriber::EnvFilter;

fn init_tracing(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "imagegen_gateway={lvl},render_performance={lvl},tower_http=info",
            lvl = cfg.level
        ))
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match cfg.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.init(),
    }
}

/// 周期性清理长期失联的 worker（超过 10 个新鲜度窗口）
fn spawn_stale_worker_pruner(state: &AppState, shutdown: &ShutdownManager) {
    let feed = state.registry_feed.clone();
    let freshness = state.workers.freshness();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(freshness.max(std::time::Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let pruned = feed.prune_older_than(freshness * 10, chrono::Utc::now());
                    if pruned > 0 {
                        tracing::info!("已清理 {} 个失联 worker", pruned);
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // 日志格式来自配置，配置加载失败只能直接打印
    if let Err(e) = AppConfig::init_global() {
        eprintln!("Config init failed: {e}");
        std::process::exit(1);
    }
    let config = AppConfig::global();
    init_tracing(&config.logging);

    let shutdown_manager = ShutdownManager::new();
    if let Err(e) = shutdown_manager.listen_for_signals() {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    let app_state = match AppState::from_config(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("应用状态初始化失败: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        "已注册模型: {:?}，默认模型: {}",
        app_state.models.names(),
        app_state.default_model
    );
    spawn_stale_worker_pruner(&app_state, &shutdown_manager);

    let app = app::build_app(app_state, &config.api.prefix);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("OpenAPI: http://{}/api-docs/openapi.json", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("Render API: http://{}{}/image", addr, config.api.prefix);

    let signal = shutdown_manager.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let reason = signal.wait().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
    });
    let mut server_task = tokio::spawn(async move { server.await });

    // 进入优雅退出后，最多等待 shutdown.timeout_secs 让在途请求完成
    let shutdown_timeout = config.shutdown.timeout_duration();
    tokio::select! {
        res = &mut server_task => match res {
            Ok(Ok(())) => tracing::info!("服务器已优雅关闭"),
            Ok(Err(e)) => {
                tracing::error!("服务器运行错误: {}", e);
                std::process::exit(1);
            }
            Err(e) => {
                tracing::error!("服务器任务异常退出: {}", e);
                std::process::exit(1);
            }
        },
        _ = async {
            shutdown_manager.wait().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            tracing::warn!("优雅退出超时（{}秒），强制退出", config.shutdown.timeout_secs);
            server_task.abort();
        }
    }
}
