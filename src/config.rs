use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::features::registry::models::{ModelDescriptor, ModelFamily};

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 16384,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 未设置时生效）
    pub level: String,
    /// 日志格式：full | compact | json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "full".to_string(),
        }
    }
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API 路由前缀
    pub prefix: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: "/api/v1".to_string(),
        }
    }
}

/// 后端 worker 调用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// 单次尝试的超时（秒），超时计为一次失败并进入重试
    #[serde(default = "BackendConfig::default_request_timeout")]
    pub request_timeout_secs: u64,
    /// 建连超时（秒）
    #[serde(default = "BackendConfig::default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// batchStep 最大尝试次数（含首次）
    #[serde(default = "BackendConfig::default_max_attempts")]
    pub max_attempts: u32,
    /// 线性退避基数（毫秒）：第 n 次失败后等待 base * n
    #[serde(default = "BackendConfig::default_backoff_base")]
    pub backoff_base_ms: u64,
    /// batchStep worker 的生成路径
    #[serde(default = "BackendConfig::default_batch_step_path")]
    pub batch_step_path: String,
    /// simpleParametric worker 的生成路径
    #[serde(default = "BackendConfig::default_simple_parametric_path")]
    pub simple_parametric_path: String,
}

impl BackendConfig {
    fn default_request_timeout() -> u64 {
        60
    }
    fn default_connect_timeout() -> u64 {
        5
    }
    fn default_max_attempts() -> u32 {
        3
    }
    fn default_backoff_base() -> u64 {
        1000
    }
    fn default_batch_step_path() -> String {
        "/generate".to_string()
    }
    fn default_simple_parametric_path() -> String {
        "/imagine".to_string()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: Self::default_request_timeout(),
            connect_timeout_secs: Self::default_connect_timeout(),
            max_attempts: Self::default_max_attempts(),
            backoff_base_ms: Self::default_backoff_base(),
            batch_step_path: Self::default_batch_step_path(),
            simple_parametric_path: Self::default_simple_parametric_path(),
        }
    }
}

/// 静态 worker（不依赖心跳，永不过期），例如托管的 simpleParametric API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticWorkerConfig {
    pub id: String,
    pub endpoint: String,
    pub family: ModelFamily,
    #[serde(default)]
    pub load: u32,
}

/// worker 注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// 心跳新鲜度窗口（秒），超过该时长未上报的 worker 不参与选择
    #[serde(default = "RegistryConfig::default_freshness")]
    pub freshness_secs: u64,
    /// 静态 worker 列表
    #[serde(default)]
    pub static_workers: Vec<StaticWorkerConfig>,
}

impl RegistryConfig {
    fn default_freshness() -> u64 {
        60
    }

    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            freshness_secs: Self::default_freshness(),
            static_workers: vec![StaticWorkerConfig {
                id: "airforce".to_string(),
                endpoint: "https://api.airforce".to_string(),
                family: ModelFamily::SimpleParametric,
                load: 0,
            }],
        }
    }
}

/// 模型注册配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// 未指定 model 时使用的模型
    #[serde(default = "ModelsConfig::default_model")]
    pub default_model: String,
    /// 已注册模型
    #[serde(default = "ModelsConfig::default_registered")]
    pub registered: Vec<ModelDescriptor>,
}

impl ModelsConfig {
    fn default_model() -> String {
        "flux".to_string()
    }
    fn default_registered() -> Vec<ModelDescriptor> {
        vec![
            ModelDescriptor::new("flux", ModelFamily::BatchStep),
            ModelDescriptor::new("turbo", ModelFamily::BatchStep),
            ModelDescriptor::new("any-dark", ModelFamily::SimpleParametric),
        ]
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: Self::default_model(),
            registered: Self::default_registered(),
        }
    }
}

/// 图片后处理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessConfig {
    /// 普通 Logo 路径（缺省使用内置徽标）
    #[serde(default)]
    pub standard_logo_path: Option<String>,
    /// 受限 Logo 路径（缺省使用内置徽标）
    #[serde(default)]
    pub restricted_logo_path: Option<String>,
    /// Logo 宽度占图片宽度的比例
    #[serde(default = "PostProcessConfig::default_logo_scale")]
    pub logo_scale: f32,
    /// 并发后处理许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
}

impl PostProcessConfig {
    fn default_logo_scale() -> f32 {
        0.15
    }

    /// 实际生效的并发许可数
    pub fn effective_parallelism(&self) -> usize {
        match self.max_parallel as usize {
            0 => num_cpus::get(),
            n => n,
        }
    }
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            standard_logo_path: None,
            restricted_logo_path: None,
            logo_scale: Self::default_logo_scale(),
            max_parallel: 0,
        }
    }
}

/// 成品缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_enabled")]
    pub enabled: bool,
    /// 缓存最大容量（字节），按图片字节大小加权
    #[serde(default = "CacheConfig::default_max_bytes")]
    pub max_bytes: u64,
    /// 缓存 TTL（秒）
    #[serde(default = "CacheConfig::default_ttl")]
    pub ttl_secs: u64,
}

impl CacheConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_max_bytes() -> u64 {
        256 * 1024 * 1024
    }
    fn default_ttl() -> u64 {
        3600
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_bytes: Self::default_max_bytes(),
            ttl_secs: Self::default_ttl(),
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub postprocess: PostProcessConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let builder = ConfigBuilder::builder()
            // 配置文件可缺省，缺省时全部使用默认值
            .add_source(File::from(config_path).required(false))
            // 支持环境变量覆盖，例如：APP_BACKEND__MAX_ATTEMPTS
            // 层级分隔符用双下划线，避免与字段名中的下划线冲突
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = builder.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            "配置加载完成: models = {}, static_workers = {}",
            config.models.registered.len(),
            config.registry.static_workers.len()
        );

        Ok(config)
    }

    /// 启动期一致性校验
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.max_attempts == 0 {
            return Err(ConfigError::Message(
                "backend.max_attempts 必须 >= 1".to_string(),
            ));
        }
        if !self
            .models
            .registered
            .iter()
            .any(|m| m.name == self.models.default_model)
        {
            return Err(ConfigError::Message(format!(
                "默认模型 {} 未注册",
                self.models.default_model
            )));
        }
        if !(0.0..=1.0).contains(&self.postprocess.logo_scale) {
            return Err(ConfigError::Message(
                "postprocess.logo_scale 必须位于 [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径
    fn get_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.backend.max_attempts, 3);
        assert_eq!(cfg.backend.backoff_base_ms, 1000);
        assert_eq!(cfg.backend.request_timeout_secs, 60);
    }

    #[test]
    fn unregistered_default_model_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.models.default_model = "missing".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.backend.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }
}
