use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;

use crate::error::RelayError;

/// 通知级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    /// 信息
    Info,
    /// 成功
    Success,
    /// 警告
    Warning,
    /// 错误
    Error,
}

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    LoggedOut,
    SessionExpired,
    InactivityTimeout,
    AuthenticationFailed,
    RateLimited,
    NetworkFailure,
    PermissionDenied,
    LoginSucceeded,
    InstanceUpdate,
}

/// 面向用户的通知消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,

    pub level: NotifyLevel,

    /// 标题
    pub title: String,

    /// 内容
    pub message: String,

    pub timestamp: DateTime<Utc>,

    /// 额外数据（剩余秒数、剩余次数等）
    pub metadata: Option<serde_json::Value>,
}

impl Notice {
    pub fn new(
        kind: NoticeKind,
        level: NotifyLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            level,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn logged_out() -> Self {
        Self::new(
            NoticeKind::LoggedOut,
            NotifyLevel::Info,
            "Logged out",
            "You have been logged out.",
        )
    }

    pub fn session_expired() -> Self {
        Self::new(
            NoticeKind::SessionExpired,
            NotifyLevel::Warning,
            "Session expired",
            "Your session has expired. Please log in again.",
        )
    }

    pub fn inactivity_timeout() -> Self {
        Self::new(
            NoticeKind::InactivityTimeout,
            NotifyLevel::Warning,
            "Session closed",
            "You were logged out after a period of inactivity.",
        )
    }

    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::new(
            NoticeKind::AuthenticationFailed,
            NotifyLevel::Error,
            "Authentication failed",
            reason,
        )
    }

    pub fn login_succeeded(subject: Option<&str>) -> Self {
        let message = match subject {
            Some(subject) => format!("Logged in as {}.", subject),
            None => "Login successful.".to_string(),
        };
        Self::new(
            NoticeKind::LoginSucceeded,
            NotifyLevel::Success,
            "Welcome",
            message,
        )
    }

    /// 将错误转换为用户通知
    pub fn from_error(err: &RelayError) -> Self {
        match err {
            RelayError::AuthenticationFailure(reason) => Self::authentication_failed(reason.clone()),
            RelayError::SessionExpired => Self::session_expired(),
            RelayError::RateLimited {
                retry_after_secs,
                remaining_attempts,
            } => Self::new(
                NoticeKind::RateLimited,
                NotifyLevel::Warning,
                "Too many attempts",
                format!("Please try again in {} seconds.", retry_after_secs),
            )
            .with_metadata(json!({
                "retry_after_secs": retry_after_secs,
                "remaining_attempts": remaining_attempts,
            })),
            RelayError::NetworkFailure(_) => Self::new(
                NoticeKind::NetworkFailure,
                NotifyLevel::Error,
                "Connection error",
                "Could not reach the server. Please try again.",
            ),
            RelayError::PermissionDenied(role) => Self::new(
                NoticeKind::PermissionDenied,
                NotifyLevel::Error,
                "Permission denied",
                "You do not have permission to perform this action.",
            )
            .with_metadata(json!({ "required_role": role })),
            other => Self::new(
                NoticeKind::AuthenticationFailed,
                NotifyLevel::Error,
                "Error",
                other.to_string(),
            ),
        }
    }
}

/// 通知总线
#[derive(Clone)]
pub struct NoticeBus {
    sender: broadcast::Sender<Notice>,
}

impl NoticeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    /// 发布通知，返回接收者数量；没有订阅者时返回 0
    pub fn publish(&self, notice: Notice) -> usize {
        tracing::debug!(kind = ?notice.kind, title = %notice.title, "Publishing notice");
        self.sender.send(notice).unwrap_or(0)
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new(64)
    }
}
