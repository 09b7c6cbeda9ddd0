use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::gateway::GatewayConfig;

/// 全局配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// 会话配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 过期前多少秒刷新令牌
    pub refresh_threshold_secs: u64,

    /// 无操作超时（秒）
    pub inactivity_timeout_secs: u64,

    /// 无操作检查间隔（秒）
    pub inactivity_check_interval_secs: u64,

    /// 是否启用活动跟踪
    pub track_activity: bool,
}

impl SessionConfig {
    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn inactivity_check_interval(&self) -> Duration {
        Duration::from_secs(self.inactivity_check_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: 5 * 60,
            inactivity_timeout_secs: 30 * 60,
            inactivity_check_interval_secs: 60,
            track_activity: true,
        }
    }
}

/// 限流配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// 每个窗口最大请求数
    pub max_requests: u32,

    /// 窗口长度（秒）
    pub window_secs: u64,

    /// 封禁时长（秒）
    pub lockout_secs: u64,

    /// 最大登录失败次数
    pub max_login_attempts: u32,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 15 * 60,
            lockout_secs: 15 * 60,
            max_login_attempts: 5,
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 会话文件路径，相对路径基于配置目录，未设置时为配置目录下的 session.json
    pub session_file: Option<PathBuf>,

    /// 端点缓存使用的键
    pub endpoints_cache_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_file: None,
            endpoints_cache_key: "relaydesk_endpoints".to_string(),
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
