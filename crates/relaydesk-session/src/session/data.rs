use serde::{Deserialize, Serialize};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

/// 会话数据
///
/// 仅在 `access_token` 有值时视为已认证，`expires_at_ms` 同时有值。
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: Option<String>,

    pub refresh_token: Option<String>,

    /// 访问令牌过期时间（毫秒）
    pub expires_at_ms: Option<i64>,

    /// 令牌声明中的角色
    pub role: Option<String>,

    /// 令牌声明中的用户
    pub subject: Option<String>,

    /// 最后活跃时间（毫秒）
    pub last_activity_ms: Option<i64>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        if self.access_token.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// 检查访问令牌是否过期，缺少过期时间视为已过期
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |exp| now_ms >= exp)
    }

    /// 距离过期的毫秒数，已过期时为负数
    pub fn expires_in_ms(&self, now_ms: i64) -> Option<i64> {
        self.expires_at_ms.map(|exp| exp - now_ms)
    }

    /// 空闲时长（毫秒）
    pub fn idle_ms(&self, now_ms: i64) -> i64 {
        self.last_activity_ms.map_or(0, |last| (now_ms - last).max(0))
    }

    /// 清空全部字段
    pub fn clear(&mut self) {
        *self = Session::default();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at_ms", &self.expires_at_ms)
            .field("role", &self.role)
            .field("subject", &self.subject)
            .field("last_activity_ms", &self.last_activity_ms)
            .finish()
    }
}
