use serde::{Deserialize, Serialize};

/// 单个标识符的限流状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    /// 当前窗口内的请求数
    pub window_request_count: u32,

    /// 当前窗口起点（毫秒）
    pub window_start_ms: i64,

    pub blocked: bool,

    /// 封禁截止时间，仅在 blocked 时有值
    pub blocked_until_ms: Option<i64>,

    /// 连续登录失败次数
    pub login_failure_count: u32,

    pub last_login_attempt_ms: Option<i64>,
}

impl RateLimitEntry {
    pub fn new(now_ms: i64) -> Self {
        Self {
            window_request_count: 0,
            window_start_ms: now_ms,
            blocked: false,
            blocked_until_ms: None,
            login_failure_count: 0,
            last_login_attempt_ms: None,
        }
    }

    /// 检查封禁状态
    ///
    /// 仍在封禁中返回剩余毫秒数；封禁已到期则解除封禁并重置所有计数。
    pub(crate) fn check_block(&mut self, now_ms: i64) -> Option<i64> {
        if !self.blocked {
            return None;
        }

        match self.blocked_until_ms {
            Some(until) if now_ms < until => Some(until - now_ms),
            _ => {
                self.blocked = false;
                self.blocked_until_ms = None;
                self.window_request_count = 0;
                self.window_start_ms = now_ms;
                self.login_failure_count = 0;
                None
            }
        }
    }

    pub(crate) fn block(&mut self, now_ms: i64, lockout_ms: i64) {
        self.blocked = true;
        self.blocked_until_ms = Some(now_ms + lockout_ms);
    }

    /// 窗口到期时开启新窗口
    pub(crate) fn roll_window(&mut self, now_ms: i64, window_ms: i64) {
        if now_ms - self.window_start_ms >= window_ms {
            self.window_request_count = 0;
            self.window_start_ms = now_ms;
        }
    }
}
