use relaydesk_config::RateLimitConfig;
use relaydesk_core::SharedClock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::RateLimitEntry;

/// 请求限流结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// 允许，附带窗口内剩余请求数
    Allowed { remaining: u32 },
    /// 已封禁
    Blocked { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// 登录尝试结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginDecision {
    /// 允许继续尝试
    Allowed { remaining_attempts: u32 },
    /// 失败次数过多，已锁定
    Locked { retry_after: Duration },
}

impl LoginDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LoginDecision::Allowed { .. })
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn remaining(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

/// 限流器
///
/// 按标识符（通常是用户名）统计固定窗口内的请求数和连续登录失败次数。
/// 克隆后共享同一份状态。
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: SharedClock,
    entries: Arc<RwLock<HashMap<String, RateLimitEntry>>>,
}

impl RateLimiter {
    /// 创建新的限流器
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// 检查是否允许请求
    ///
    /// 允许时计入当前窗口；达到上限时封禁该标识符。
    pub async fn can_make_request(&self, identifier: &str) -> RateDecision {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(identifier.to_string())
            .or_insert_with(|| RateLimitEntry::new(now));

        if let Some(left) = entry.check_block(now) {
            debug!(identifier = identifier, retry_after_ms = left, "Request rejected, identifier blocked");
            return RateDecision::Blocked {
                retry_after: remaining(left),
            };
        }

        entry.roll_window(now, millis(self.config.window()));

        if entry.window_request_count >= self.config.max_requests {
            entry.block(now, millis(self.config.lockout()));
            warn!(
                identifier = identifier,
                max_requests = self.config.max_requests,
                "Rate limit exceeded, identifier blocked"
            );
            return RateDecision::Blocked {
                retry_after: self.config.lockout(),
            };
        }

        entry.window_request_count += 1;
        RateDecision::Allowed {
            remaining: self.config.max_requests - entry.window_request_count,
        }
    }

    /// 记录一次登录尝试
    ///
    /// 成功会清零失败计数，但不会解除已有的封禁。
    /// 失败次数达到上限时封禁该标识符。
    pub async fn track_login_attempt(&self, identifier: &str, success: bool) -> LoginDecision {
        let now = self.clock.now_ms();
        let max_attempts = self.config.max_login_attempts;
        let lockout_ms = millis(self.config.lockout());

        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(identifier.to_string())
            .or_insert_with(|| RateLimitEntry::new(now));

        if success {
            entry.login_failure_count = 0;
            entry.last_login_attempt_ms = Some(now);
            return LoginDecision::Allowed {
                remaining_attempts: max_attempts,
            };
        }

        if let Some(left) = entry.check_block(now) {
            return LoginDecision::Locked {
                retry_after: remaining(left),
            };
        }

        // 上次失败距今超过锁定时长，重新计数
        if let Some(last) = entry.last_login_attempt_ms {
            if now - last > lockout_ms {
                entry.login_failure_count = 0;
            }
        }

        entry.login_failure_count += 1;
        entry.last_login_attempt_ms = Some(now);

        if entry.login_failure_count >= max_attempts {
            entry.block(now, lockout_ms);
            warn!(
                identifier = identifier,
                failures = entry.login_failure_count,
                "Too many failed login attempts, identifier locked"
            );
            return LoginDecision::Locked {
                retry_after: self.config.lockout(),
            };
        }

        LoginDecision::Allowed {
            remaining_attempts: max_attempts - entry.login_failure_count,
        }
    }

    /// 查询封禁剩余时长，未封禁返回 None
    pub async fn is_locked(&self, identifier: &str) -> Option<Duration> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(identifier)?;
        entry.check_block(now).map(remaining)
    }

    /// 当前窗口剩余可用请求数
    pub async fn remaining_requests(&self, identifier: &str) -> u32 {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;

        match entries.get(identifier) {
            None => self.config.max_requests,
            Some(entry) if entry.blocked && entry.blocked_until_ms.is_some_and(|until| now < until) => 0,
            Some(entry) if now - entry.window_start_ms >= millis(self.config.window()) => {
                self.config.max_requests
            }
            Some(entry) => self
                .config
                .max_requests
                .saturating_sub(entry.window_request_count),
        }
    }

    /// 距离当前窗口（或封禁）结束的时长
    pub async fn time_to_reset(&self, identifier: &str) -> Duration {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;

        let Some(entry) = entries.get(identifier) else {
            return Duration::ZERO;
        };

        if let Some(until) = entry.blocked_until_ms.filter(|_| entry.blocked) {
            return remaining(until - now);
        }

        remaining(entry.window_start_ms + millis(self.config.window()) - now)
    }

    /// 获取标识符状态快照
    pub async fn entry(&self, identifier: &str) -> Option<RateLimitEntry> {
        self.entries.read().await.get(identifier).cloned()
    }

    /// 清除标识符的全部限流状态
    pub async fn reset(&self, identifier: &str) {
        if self.entries.write().await.remove(identifier).is_some() {
            info!(identifier = identifier, "Rate limit state reset");
        }
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            clock: self.clock.clone(),
            entries: self.entries.clone(),
        }
    }
}
