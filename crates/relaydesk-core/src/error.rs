use thiserror::Error;

/// relaydesk 统一错误类型
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Rate limited: retry in {retry_after_secs}s")]
    RateLimited {
        retry_after_secs: u64,
        remaining_attempts: Option<u32>,
    },

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Permission denied: role '{0}' required")]
    PermissionDenied(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// 面向用户的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 凭据错误或令牌无法解码，不重试
    AuthenticationFailure,
    /// 会话过期，强制登出
    SessionExpired,
    /// 请求或登录被限流
    RateLimited,
    /// 网络调用失败，由用户重新触发
    NetworkFailure,
    Other,
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::AuthenticationFailure(_) => ErrorKind::AuthenticationFailure,
            RelayError::SessionExpired => ErrorKind::SessionExpired,
            RelayError::RateLimited { .. } => ErrorKind::RateLimited,
            RelayError::NetworkFailure(_) => ErrorKind::NetworkFailure,
            _ => ErrorKind::Other,
        }
    }

    pub fn rate_limited(retry_after: std::time::Duration, remaining_attempts: Option<u32>) -> Self {
        RelayError::RateLimited {
            // 向上取整，避免显示 "0 秒后重试"
            retry_after_secs: retry_after.as_millis().div_ceil(1000) as u64,
            remaining_attempts,
        }
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Internal(err.to_string())
    }
}
