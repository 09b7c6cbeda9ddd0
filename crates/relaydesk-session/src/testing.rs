use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use relaydesk_core::{RelayError, Result, SharedClock};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::auth::{TokenPair, TokenRefresher};
use crate::store::KeyValueStore;

/// 签发测试令牌，`exp_ms` 为毫秒时间戳
pub(crate) fn issue_token(exp_ms: i64, role: Option<&str>, subject: &str) -> String {
    let mut claims = json!({
        "exp": exp_ms / 1000,
        "sub": subject,
        "sessionId": format!("session-{}", subject),
    });
    if let Some(role) = role {
        claims["role"] = json!(role);
    }

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"gateway-secret"),
    )
    .unwrap()
}

/// 可编排结果的刷新器
pub(crate) struct MockRefresher {
    clock: SharedClock,
    ttl: Duration,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl MockRefresher {
    /// 每次调用签发一个有效期为 `ttl` 的新令牌
    pub(crate) fn succeeding(clock: SharedClock, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(clock: SharedClock) -> Self {
        Self {
            fail: true,
            ..Self::succeeding(clock, Duration::ZERO)
        }
    }

    /// 每次刷新前等待 `delay`
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenRefresher for MockRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().unwrap().push(refresh_token.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fail {
            return Err(RelayError::SessionExpired);
        }

        let exp_ms = self.clock.now_ms() + self.ttl.as_millis() as i64;
        Ok(TokenPair {
            access_token: issue_token(exp_ms, Some("admin"), "alice"),
            refresh_token: Some(format!("refresh-{}", call)),
        })
    }
}

/// 所有写入都失败的存储
pub(crate) struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(RelayError::Storage("quota exceeded".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(RelayError::Storage("quota exceeded".into()))
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Err(RelayError::Storage("quota exceeded".into()))
    }
}
