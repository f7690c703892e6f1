/// 统一错误处理模块
pub mod error;

/// 配置模块
pub mod config;

/// 功能聚合模块
pub mod features;

/// 应用状态聚合模块
pub mod state;

/// 路由装配
pub mod app;

/// 调用方上下文（request_id / 调用方哈希）中间件
pub mod caller;

/// 后端调用指标
pub mod metrics;

/// OpenAPI 文档
pub mod openapi;

/// 优雅退出管理模块
pub mod shutdown;

/// 后端 HTTP Client
pub mod http;

// 导出常用类型供外部使用
pub use config::AppConfig;
pub use error::{AppError, DispatchError};
pub use shutdown::{ShutdownManager, ShutdownReason};
