use relaydesk_config::SessionConfig;
use relaydesk_core::{Notice, NoticeBus, RelayError, Result, SharedClock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::data::{Session, SessionState};
use super::timer::ScheduledTask;
use crate::auth::{decode_claims, TokenRefresher};
use crate::store::{keys, KeyValueStore};

/// 会话结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Logout,
    Expired,
    Inactivity,
    RefreshFailed,
    InvalidToken,
}

impl EndReason {
    fn notice(self) -> Notice {
        match self {
            EndReason::Logout => Notice::logged_out(),
            EndReason::Expired | EndReason::RefreshFailed => Notice::session_expired(),
            EndReason::Inactivity => Notice::inactivity_timeout(),
            EndReason::InvalidToken => Notice::authentication_failed("The access token could not be read."),
        }
    }

    /// 即使当前没有会话也要通知用户
    fn always_notifies(self) -> bool {
        matches!(self, EndReason::RefreshFailed | EndReason::InvalidToken)
    }
}

/// 令牌来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// 登录或恢复，视为用户活动
    Login,
    /// 静默刷新，不更新活跃时间
    Refresh,
}

/// 定时器状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerStatus {
    /// 待触发的刷新时间（毫秒）
    pub refresh_due_at_ms: Option<i64>,

    /// 空闲检测是否在运行
    pub inactivity_monitoring: bool,
}

#[derive(Default)]
struct Timers {
    refresh: Option<ScheduledTask>,
    inactivity: Option<ScheduledTask>,
}

struct Inner {
    config: SessionConfig,
    store: Arc<dyn KeyValueStore>,
    refresher: Arc<dyn TokenRefresher>,
    clock: SharedClock,
    notices: NoticeBus,
    session: Mutex<Session>,
    timers: Mutex<Timers>,
    /// 每次安装或结束会话时递增，用于丢弃过期的刷新结果
    epoch: AtomicU64,
    refreshing: AtomicBool,
}

/// 刷新进行中标记，离开作用域时清除
struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 会话控制器
///
/// 持有当前会话，负责令牌的持久化、提前刷新和空闲登出。
/// 克隆得到的是同一个控制器的句柄；最后一个句柄被丢弃时后台定时器随之中止。
///
/// 定时器依赖 tokio 运行时，需要在运行时内调用 [`SessionController::new`]
/// 和 [`SessionController::set_session`]。
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// 创建会话控制器，并从存储中恢复会话
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn KeyValueStore>,
        refresher: Arc<dyn TokenRefresher>,
        clock: SharedClock,
        notices: NoticeBus,
    ) -> Self {
        let controller = Self {
            inner: Arc::new(Inner {
                config,
                store,
                refresher,
                clock,
                notices,
                session: Mutex::new(Session::default()),
                timers: Mutex::new(Timers::default()),
                epoch: AtomicU64::new(0),
                refreshing: AtomicBool::new(false),
            }),
        };
        controller.rehydrate();
        controller
    }

    /// 安装新会话
    ///
    /// 解码访问令牌获取过期时间和角色，持久化后重新安排刷新和空闲检测。
    /// 令牌无法解码时结束当前会话并返回认证错误。
    pub fn set_session(&self, access_token: &str, refresh_token: Option<&str>) -> Result<()> {
        self.install(access_token, refresh_token, Origin::Login)
    }

    /// 获取访问令牌
    ///
    /// 令牌已过期时清空会话并返回 None；临近过期时在后台触发刷新，
    /// 本次仍返回当前令牌。
    pub fn get_token(&self) -> Option<String> {
        let now = self.now_ms();
        let (token, expires_in) = {
            let session = self.lock_session();
            (session.access_token.clone()?, session.expires_in_ms(now))
        };

        match expires_in {
            Some(left) if left > 0 => {
                if left <= self.threshold_ms() {
                    self.trigger_refresh(now);
                }
                Some(token)
            }
            _ => {
                info!("Access token expired");
                self.end_session(EndReason::Expired);
                None
            }
        }
    }

    /// 检查是否已认证
    ///
    /// 令牌有效且未超过空闲时长时返回 true；空闲超时会强制登出。
    pub fn is_authenticated(&self) -> bool {
        self.get_token().is_some() && self.enforce_inactivity()
    }

    /// 检查当前会话是否具有指定角色
    pub fn has_role(&self, required: &str) -> bool {
        self.is_authenticated() && self.lock_session().role.as_deref() == Some(required)
    }

    /// 记录用户活动
    pub fn record_activity(&self) {
        if !self.inner.config.track_activity || !self.enforce_inactivity() {
            return;
        }

        let now = self.now_ms();
        let recorded = {
            let mut session = self.lock_session();
            if session.is_authenticated() {
                session.last_activity_ms = Some(now);
                true
            } else {
                false
            }
        };

        if recorded {
            self.persist(keys::LAST_ACTIVITY, Some(&now.to_string()));
        }
    }

    /// 登出，清空会话和持久化数据
    ///
    /// 重复调用不会重复通知。
    pub fn logout(&self) {
        self.end_session(EndReason::Logout);
    }

    pub fn state(&self) -> SessionState {
        self.lock_session().state()
    }

    /// 当前会话快照
    pub fn session(&self) -> Session {
        self.lock_session().clone()
    }

    pub fn role(&self) -> Option<String> {
        self.lock_session().role.clone()
    }

    pub fn subject(&self) -> Option<String> {
        self.lock_session().subject.clone()
    }

    pub fn expires_at_ms(&self) -> Option<i64> {
        self.lock_session().expires_at_ms
    }

    pub fn timer_status(&self) -> TimerStatus {
        let timers = self.lock_timers();
        TimerStatus {
            refresh_due_at_ms: timers
                .refresh
                .as_ref()
                .filter(|task| task.is_pending())
                .map(ScheduledTask::due_at_ms),
            inactivity_monitoring: timers
                .inactivity
                .as_ref()
                .is_some_and(ScheduledTask::is_pending),
        }
    }

    pub fn notices(&self) -> &NoticeBus {
        &self.inner.notices
    }

    /// 用刷新令牌换取新的访问令牌
    ///
    /// 同一时间只允许一个刷新在进行。刷新期间会话被替换或结束时丢弃结果。
    /// 失败时强制登出。
    pub(crate) async fn refresh(&self) -> Result<()> {
        let Some(guard) = RefreshGuard::acquire(&self.inner.refreshing) else {
            debug!("Token refresh already in progress");
            return Ok(());
        };

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let (authenticated, refresh_token) = {
            let session = self.lock_session();
            (session.is_authenticated(), session.refresh_token.clone())
        };

        if !authenticated {
            return Ok(());
        }

        let Some(refresh_token) = refresh_token else {
            warn!("No refresh token available, ending session");
            drop(guard);
            self.end_session(EndReason::RefreshFailed);
            return Err(RelayError::SessionExpired);
        };

        debug!("Refreshing access token");
        let outcome = self.inner.refresher.refresh(&refresh_token).await;
        drop(guard);

        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Session changed during refresh, discarding result");
            return Ok(());
        }

        match outcome {
            Ok(pair) => {
                let next_refresh = pair.refresh_token.as_deref().unwrap_or(&refresh_token);
                self.install(&pair.access_token, Some(next_refresh), Origin::Refresh)?;
                info!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.end_session(EndReason::RefreshFailed);
                Err(RelayError::SessionExpired)
            }
        }
    }

    fn install(&self, access_token: &str, refresh_token: Option<&str>, origin: Origin) -> Result<()> {
        let claims = match decode_claims(access_token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Rejecting undecodable access token");
                self.end_session(EndReason::InvalidToken);
                return Err(e);
            }
        };

        let now = self.now_ms();
        let expires_at = claims.expires_at_ms();
        let refresh_token = refresh_token.filter(|token| !token.is_empty());

        let last_activity = {
            let mut session = self.lock_session();
            let last_activity = match origin {
                Origin::Refresh => session.last_activity_ms.unwrap_or(now),
                Origin::Login => now,
            };

            *session = Session {
                access_token: Some(access_token.to_string()),
                refresh_token: refresh_token.map(str::to_string),
                expires_at_ms: Some(expires_at),
                role: claims.role.clone(),
                subject: claims.sub.clone(),
                last_activity_ms: Some(last_activity),
            };
            last_activity
        };
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        self.persist(keys::ACCESS_TOKEN, Some(access_token));
        self.persist(keys::REFRESH_TOKEN, refresh_token);
        self.persist(keys::ROLE, claims.role.as_deref());
        self.persist(keys::LAST_ACTIVITY, Some(&last_activity.to_string()));

        self.schedule_refresh(expires_at, now);
        if origin == Origin::Login {
            self.start_inactivity_monitor(now);
        }

        info!(
            subject = claims.sub.as_deref().unwrap_or("-"),
            role = claims.role.as_deref().unwrap_or("-"),
            expires_in_secs = (expires_at - now) / 1000,
            "Session established"
        );
        Ok(())
    }

    /// 从存储恢复会话
    fn rehydrate(&self) {
        let Some(access_token) = self.read(keys::ACCESS_TOKEN) else {
            return;
        };

        let claims = match decode_claims(&access_token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Discarding persisted session with undecodable token");
                self.clear_persisted();
                return;
            }
        };

        let now = self.now_ms();
        if now >= claims.expires_at_ms() {
            info!("Persisted session has expired");
            self.clear_persisted();
            self.inner.notices.publish(EndReason::Expired.notice());
            return;
        }

        let last_activity = self
            .read(keys::LAST_ACTIVITY)
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(now);

        if self.inner.config.track_activity
            && now - last_activity >= self.timeout_ms()
        {
            info!("Persisted session was idle too long");
            self.clear_persisted();
            self.inner.notices.publish(EndReason::Inactivity.notice());
            return;
        }

        let refresh_token = self.read(keys::REFRESH_TOKEN).filter(|token| !token.is_empty());

        {
            let mut session = self.lock_session();
            *session = Session {
                access_token: Some(access_token),
                refresh_token,
                expires_at_ms: Some(claims.expires_at_ms()),
                role: claims.role.clone(),
                subject: claims.sub.clone(),
                last_activity_ms: Some(last_activity),
            };
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        self.schedule_refresh(claims.expires_at_ms(), now);
        self.start_inactivity_monitor(now);

        info!(
            subject = claims.sub.as_deref().unwrap_or("-"),
            "Session restored from storage"
        );
    }

    /// 结束会话：取消定时器，清空内存和持久化数据
    fn end_session(&self, reason: EndReason) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        let timers = std::mem::take(&mut *self.lock_timers());
        drop(timers);

        let had_session = {
            let mut session = self.lock_session();
            let had_session = session.is_authenticated();
            session.clear();
            had_session
        };
        self.clear_persisted();

        if had_session || reason.always_notifies() {
            info!(reason = ?reason, "Session ended");
            self.inner.notices.publish(reason.notice());
        } else {
            debug!(reason = ?reason, "No active session to end");
        }
    }

    /// 空闲超时时强制登出，返回会话是否仍然有效
    fn enforce_inactivity(&self) -> bool {
        let now = self.now_ms();
        let idle = {
            let session = self.lock_session();
            if !session.is_authenticated() {
                return false;
            }
            session.idle_ms(now)
        };

        if self.inner.config.track_activity && idle >= self.timeout_ms() {
            info!(idle_secs = idle / 1000, "Session idle timeout");
            self.end_session(EndReason::Inactivity);
            return false;
        }
        true
    }

    /// 安排刷新：在过期前阈值时间触发，已进入阈值则立即触发
    fn schedule_refresh(&self, expires_at_ms: i64, now_ms: i64) {
        self.arm_refresh(expires_at_ms - self.threshold_ms(), now_ms);
    }

    fn arm_refresh(&self, due_at: i64, now_ms: i64) {
        let delay = Duration::from_millis((due_at - now_ms).max(0) as u64);
        debug!(delay_secs = delay.as_secs(), "Scheduling token refresh");

        let weak = Arc::downgrade(&self.inner);
        let task = ScheduledTask::spawn("refresh", due_at.max(now_ms), async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            if let Some(controller) = Self::upgrade(&weak) {
                if let Err(e) = controller.refresh().await {
                    debug!(error = %e, "Scheduled refresh did not complete");
                }
            }
        });

        self.lock_timers().refresh = task;
    }

    /// 临近过期时的被动刷新；已有到期的刷新任务或刷新进行中时跳过
    fn trigger_refresh(&self, now_ms: i64) {
        if self.inner.refreshing.load(Ordering::SeqCst) {
            return;
        }

        let due_soon = self
            .lock_timers()
            .refresh
            .as_ref()
            .is_some_and(|task| task.is_pending() && task.due_at_ms() <= now_ms);
        if due_soon {
            return;
        }

        self.arm_refresh(now_ms, now_ms);
    }

    /// 启动空闲检测，替换已有的检测任务
    fn start_inactivity_monitor(&self, now_ms: i64) {
        if !self.inner.config.track_activity {
            self.lock_timers().inactivity = None;
            return;
        }

        let period = self.inner.config.inactivity_check_interval();
        let weak = Arc::downgrade(&self.inner);
        let task = ScheduledTask::spawn(
            "inactivity",
            now_ms + period.as_millis() as i64,
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let Some(controller) = Self::upgrade(&weak) else {
                        break;
                    };
                    if !controller.enforce_inactivity() {
                        break;
                    }
                }
            },
        );

        self.lock_timers().inactivity = task;
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.inner.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read session field");
                None
            }
        }
    }

    /// 写入持久化存储，失败只记录日志
    fn persist(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(value) => self.inner.store.set(key, value),
            None => self.inner.store.remove(key),
        };
        if let Err(e) = result {
            warn!(key = key, error = %e, "Failed to persist session field");
        }
    }

    fn clear_persisted(&self) {
        for key in keys::SESSION_KEYS {
            self.persist(key, None);
        }
    }

    fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    fn threshold_ms(&self) -> i64 {
        self.inner.config.refresh_threshold().as_millis() as i64
    }

    fn timeout_ms(&self) -> i64 {
        self.inner.config.inactivity_timeout().as_millis() as i64
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_timers(&self) -> MutexGuard<'_, Timers> {
        self.inner
            .timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("session", &*self.lock_session())
            .field("timers", &self.timer_status())
            .finish()
    }
}
