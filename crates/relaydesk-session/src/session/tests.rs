use relaydesk_config::SessionConfig;
use relaydesk_core::{ErrorKind, Notice, NoticeBus, NoticeKind, SharedClock, TokioClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

use super::{SessionController, SessionState, TimerStatus};
use crate::store::{keys, KeyValueStore, MemoryStore};
use crate::testing::{issue_token, FailingStore, MockRefresher};

const ORIGIN_MS: i64 = 1_700_000_000_000;

const MINUTE: Duration = Duration::from_secs(60);

struct Harness {
    controller: SessionController,
    store: Arc<MemoryStore>,
    refresher: Arc<MockRefresher>,
    notices: broadcast::Receiver<Notice>,
    clock: SharedClock,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        let clock: SharedClock = Arc::new(TokioClock::with_origin(ORIGIN_MS));
        let refresher = MockRefresher::succeeding(clock.clone(), Duration::from_secs(3600));
        Self::build(config, Arc::new(MemoryStore::new()), refresher, clock)
    }

    fn failing(config: SessionConfig) -> Self {
        let clock: SharedClock = Arc::new(TokioClock::with_origin(ORIGIN_MS));
        let refresher = MockRefresher::failing(clock.clone());
        Self::build(config, Arc::new(MemoryStore::new()), refresher, clock)
    }

    fn build(
        config: SessionConfig,
        store: Arc<MemoryStore>,
        refresher: MockRefresher,
        clock: SharedClock,
    ) -> Self {
        let refresher = Arc::new(refresher);
        let bus = NoticeBus::default();
        let notices = bus.subscribe();
        let controller = SessionController::new(
            config,
            store.clone(),
            refresher.clone(),
            clock.clone(),
            bus,
        );

        Self {
            controller,
            store,
            refresher,
            notices,
            clock,
        }
    }

    /// 签发在 `ttl` 后过期的令牌
    fn token(&self, ttl: Duration, role: Option<&str>) -> String {
        issue_token(self.clock.now_ms() + ttl.as_millis() as i64, role, "alice")
    }

    fn drain(&mut self) -> Vec<NoticeKind> {
        let mut kinds = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            kinds.push(notice.kind);
        }
        kinds
    }

    fn persisted(&self, key: &str) -> Option<String> {
        self.store.get(key).unwrap()
    }
}

fn untracked() -> SessionConfig {
    SessionConfig {
        track_activity: false,
        ..SessionConfig::default()
    }
}

/// 让已就绪的后台任务运行
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_set_session_with_admin_role() {
    let mut h = Harness::new(SessionConfig::default());
    let token = h.token(Duration::from_secs(3600), Some("admin"));

    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    assert!(h.controller.is_authenticated());
    assert!(h.controller.has_role("admin"));
    assert!(!h.controller.has_role("user"));
    assert_eq!(h.controller.state(), SessionState::Authenticated);
    assert_eq!(h.controller.subject().as_deref(), Some("alice"));

    assert_eq!(h.persisted(keys::ACCESS_TOKEN), Some(token));
    assert_eq!(h.persisted(keys::REFRESH_TOKEN).as_deref(), Some("refresh-0"));
    assert_eq!(h.persisted(keys::ROLE).as_deref(), Some("admin"));
    assert_eq!(
        h.persisted(keys::LAST_ACTIVITY),
        Some(ORIGIN_MS.to_string())
    );

    let status = h.controller.timer_status();
    assert_eq!(
        status.refresh_due_at_ms,
        Some(ORIGIN_MS + 3_300_000)
    );
    assert!(status.inactivity_monitoring);
    assert!(h.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_expired_token_is_cleared() {
    let mut h = Harness::failing(SessionConfig::default());
    let token = issue_token(ORIGIN_MS - 1_000, Some("admin"), "alice");

    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    assert!(!h.controller.is_authenticated());
    assert!(h.controller.get_token().is_none());
    assert_eq!(h.controller.state(), SessionState::Unauthenticated);
    assert!(h.store.is_empty());
    assert_eq!(h.drain(), vec![NoticeKind::SessionExpired]);

    // 过期时清空会话会取消已安排的刷新
    settle().await;
    assert_eq!(h.refresher.calls(), 0);
    assert_eq!(h.controller.timer_status(), TimerStatus::default());
}

#[tokio::test(start_paused = true)]
async fn test_token_expiring_now_counts_as_expired() {
    let h = Harness::new(untracked());
    let token = issue_token(ORIGIN_MS, None, "alice");

    h.controller.set_session(&token, Some("refresh-0")).unwrap();
    assert!(h.controller.get_token().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_second_set_session_replaces_refresh_timer() {
    let h = Harness::new(untracked());
    let first = h.token(Duration::from_secs(3600), Some("user"));
    let second = h.token(Duration::from_secs(3600), Some("admin"));

    h.controller.set_session(&first, Some("refresh-a")).unwrap();
    h.controller.set_session(&second, Some("refresh-b")).unwrap();
    assert!(h.controller.has_role("admin"));

    sleep(Duration::from_secs(3_301)).await;

    assert_eq!(h.refresher.calls(), 1);
    assert_eq!(h.refresher.seen(), vec!["refresh-b".to_string()]);
    assert!(h.controller.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_refresh_installs_new_tokens() {
    let h = Harness::new(untracked());
    let token = h.token(Duration::from_secs(600), Some("admin"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    sleep(Duration::from_secs(301)).await;

    assert_eq!(h.refresher.calls(), 1);
    let session = h.controller.session();
    assert_ne!(session.access_token.as_deref(), Some(token.as_str()));
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(h.persisted(keys::REFRESH_TOKEN).as_deref(), Some("refresh-1"));

    // 静默刷新不算用户活动
    assert_eq!(session.last_activity_ms, Some(ORIGIN_MS));

    // 刷新后重新安排下一次刷新
    let expires_at = h.controller.expires_at_ms().unwrap();
    assert_eq!(
        h.controller.timer_status().refresh_due_at_ms,
        Some(expires_at - 300_000)
    );
    assert!(h.controller.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_forces_logout() {
    let mut h = Harness::failing(untracked());
    let token = h.token(Duration::from_secs(600), Some("admin"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    sleep(Duration::from_secs(301)).await;

    assert_eq!(h.refresher.calls(), 1);
    assert_eq!(h.controller.state(), SessionState::Unauthenticated);
    assert!(h.store.is_empty());
    assert_eq!(h.drain(), vec![NoticeKind::SessionExpired]);
    assert_eq!(h.controller.timer_status(), TimerStatus::default());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_runs_immediately_inside_threshold() {
    let h = Harness::new(untracked());
    let token = h.token(Duration::from_secs(120), Some("admin"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    assert_eq!(
        h.controller.timer_status().refresh_due_at_ms,
        Some(ORIGIN_MS)
    );

    // 刷新完成前仍返回当前令牌
    assert_eq!(h.controller.get_token(), Some(token.clone()));

    settle().await;

    assert_eq!(h.refresher.calls(), 1);
    let current = h.controller.get_token().unwrap();
    assert_ne!(current, token);
}

#[tokio::test(start_paused = true)]
async fn test_missing_refresh_token_ends_session() {
    let mut h = Harness::new(untracked());
    let token = h.token(Duration::from_secs(120), Some("admin"));
    h.controller.set_session(&token, None).unwrap();

    settle().await;

    assert_eq!(h.refresher.calls(), 0);
    assert_eq!(h.controller.state(), SessionState::Unauthenticated);
    assert_eq!(h.drain(), vec![NoticeKind::SessionExpired]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_result_discarded_after_session_change() {
    let clock: SharedClock = Arc::new(TokioClock::with_origin(ORIGIN_MS));
    let refresher = MockRefresher::succeeding(clock.clone(), Duration::from_secs(3600))
        .with_delay(Duration::from_secs(10));
    let h = Harness::build(untracked(), Arc::new(MemoryStore::new()), refresher, clock);

    let token = h.token(Duration::from_secs(3600), Some("user"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    let controller = h.controller.clone();
    let in_flight = tokio::spawn(async move { controller.refresh().await });
    settle().await;
    assert_eq!(h.refresher.calls(), 1);

    // 同一时间只允许一个刷新
    h.controller.refresh().await.unwrap();
    assert_eq!(h.refresher.calls(), 1);

    let replacement = h.token(Duration::from_secs(3600), Some("admin"));
    h.controller
        .set_session(&replacement, Some("refresh-x"))
        .unwrap();

    sleep(Duration::from_secs(11)).await;
    in_flight.await.unwrap().unwrap();

    assert_eq!(h.controller.get_token(), Some(replacement));
    assert_eq!(
        h.controller.session().refresh_token.as_deref(),
        Some("refresh-x")
    );
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_boundary() {
    let mut h = Harness::new(SessionConfig::default());
    let token = h.token(Duration::from_secs(3600), Some("admin"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();
    h.controller.record_activity();

    sleep(30 * MINUTE - Duration::from_millis(1)).await;
    assert!(h.controller.is_authenticated());

    sleep(Duration::from_millis(1)).await;
    assert!(!h.controller.is_authenticated());
    assert_eq!(h.drain(), vec![NoticeKind::InactivityTimeout]);
    assert!(h.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_activity_extends_session() {
    let h = Harness::new(SessionConfig::default());
    let token = h.token(Duration::from_secs(3600), Some("admin"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    sleep(20 * MINUTE).await;
    h.controller.record_activity();
    assert_eq!(
        h.persisted(keys::LAST_ACTIVITY),
        Some((ORIGIN_MS + 20 * 60_000).to_string())
    );

    sleep(20 * MINUTE).await;
    assert!(h.controller.is_authenticated());

    sleep(10 * MINUTE).await;
    assert!(!h.controller.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_monitor_logs_out_without_calls() {
    let mut h = Harness::new(SessionConfig::default());
    let token = h.token(Duration::from_secs(3600), Some("admin"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    sleep(31 * MINUTE).await;

    // state() 不做检查，只反映后台检测的结果
    assert_eq!(h.controller.state(), SessionState::Unauthenticated);
    assert_eq!(h.drain(), vec![NoticeKind::InactivityTimeout]);
    assert_eq!(h.controller.timer_status(), TimerStatus::default());
}

#[tokio::test(start_paused = true)]
async fn test_untracked_session_never_idles_out() {
    let h = Harness::new(untracked());
    let token = h.token(Duration::from_secs(7200), Some("admin"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    assert!(!h.controller.timer_status().inactivity_monitoring);

    sleep(45 * MINUTE).await;
    assert!(h.controller.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_logout_is_idempotent() {
    let mut h = Harness::new(SessionConfig::default());
    let token = h.token(Duration::from_secs(3600), Some("admin"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    h.controller.logout();
    h.controller.logout();

    assert_eq!(h.drain(), vec![NoticeKind::LoggedOut]);
    assert!(h.store.is_empty());
    assert!(!h.controller.is_authenticated());
    assert_eq!(h.controller.timer_status(), TimerStatus::default());

    sleep(Duration::from_secs(3_600)).await;
    assert_eq!(h.refresher.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_token_rejected() {
    let mut h = Harness::new(SessionConfig::default());
    let token = h.token(Duration::from_secs(3600), Some("admin"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    let err = h.controller.set_session("garbage", None).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
    assert_eq!(h.controller.state(), SessionState::Unauthenticated);
    assert!(h.store.is_empty());
    assert_eq!(h.drain(), vec![NoticeKind::AuthenticationFailed]);
}

#[tokio::test(start_paused = true)]
async fn test_session_restored_from_store() {
    let h = Harness::new(SessionConfig::default());
    let token = h.token(Duration::from_secs(3600), Some("admin"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    let clock: SharedClock = Arc::new(TokioClock::with_origin(ORIGIN_MS));
    let refresher = MockRefresher::succeeding(clock.clone(), Duration::from_secs(3600));
    let restored = Harness::build(SessionConfig::default(), h.store.clone(), refresher, clock);

    assert!(restored.controller.is_authenticated());
    assert!(restored.controller.has_role("admin"));
    assert_eq!(restored.controller.subject().as_deref(), Some("alice"));
    assert_eq!(
        restored.controller.expires_at_ms(),
        h.controller.expires_at_ms()
    );
    assert_eq!(
        restored.controller.session().refresh_token.as_deref(),
        Some("refresh-0")
    );

    let status = restored.controller.timer_status();
    assert_eq!(status.refresh_due_at_ms, Some(ORIGIN_MS + 3_300_000));
    assert!(status.inactivity_monitoring);
}

#[tokio::test(start_paused = true)]
async fn test_expired_persisted_session_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    store
        .set(keys::ACCESS_TOKEN, &issue_token(ORIGIN_MS - 60_000, Some("admin"), "alice"))
        .unwrap();
    store.set(keys::REFRESH_TOKEN, "refresh-0").unwrap();

    let clock: SharedClock = Arc::new(TokioClock::with_origin(ORIGIN_MS));
    let refresher = MockRefresher::succeeding(clock.clone(), Duration::from_secs(3600));
    let mut h = Harness::build(SessionConfig::default(), store, refresher, clock);

    assert_eq!(h.controller.state(), SessionState::Unauthenticated);
    assert!(h.store.is_empty());
    assert_eq!(h.drain(), vec![NoticeKind::SessionExpired]);
}

#[tokio::test(start_paused = true)]
async fn test_idle_persisted_session_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    store
        .set(keys::ACCESS_TOKEN, &issue_token(ORIGIN_MS + 3_600_000, Some("admin"), "alice"))
        .unwrap();
    store
        .set(keys::LAST_ACTIVITY, &(ORIGIN_MS - 31 * 60_000).to_string())
        .unwrap();

    let clock: SharedClock = Arc::new(TokioClock::with_origin(ORIGIN_MS));
    let refresher = MockRefresher::succeeding(clock.clone(), Duration::from_secs(3600));
    let mut h = Harness::build(SessionConfig::default(), store, refresher, clock);

    assert!(!h.controller.is_authenticated());
    assert!(h.store.is_empty());
    assert_eq!(h.drain(), vec![NoticeKind::InactivityTimeout]);
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_persisted_token_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    store.set(keys::ACCESS_TOKEN, "garbage").unwrap();
    store.set(keys::ROLE, "admin").unwrap();

    let clock: SharedClock = Arc::new(TokioClock::with_origin(ORIGIN_MS));
    let refresher = MockRefresher::succeeding(clock.clone(), Duration::from_secs(3600));
    let mut h = Harness::build(SessionConfig::default(), store, refresher, clock);

    assert_eq!(h.controller.state(), SessionState::Unauthenticated);
    assert!(h.store.is_empty());
    assert!(h.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_storage_failures_are_not_fatal() {
    let clock: SharedClock = Arc::new(TokioClock::with_origin(ORIGIN_MS));
    let refresher = Arc::new(MockRefresher::succeeding(clock.clone(), Duration::from_secs(3600)));
    let controller = SessionController::new(
        SessionConfig::default(),
        Arc::new(FailingStore),
        refresher,
        clock.clone(),
        NoticeBus::default(),
    );

    let token = issue_token(ORIGIN_MS + 3_600_000, Some("admin"), "alice");
    controller.set_session(&token, Some("refresh-0")).unwrap();
    assert!(controller.has_role("admin"));

    controller.record_activity();
    controller.logout();
    assert!(!controller.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_record_activity_without_session() {
    let h = Harness::new(SessionConfig::default());

    h.controller.record_activity();

    assert!(h.store.is_empty());
    assert_eq!(h.controller.timer_status(), TimerStatus::default());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_controller_cancels_timers() {
    let h = Harness::new(SessionConfig::default());
    let token = h.token(Duration::from_secs(600), Some("admin"));
    h.controller.set_session(&token, Some("refresh-0")).unwrap();

    let refresher = h.refresher.clone();
    drop(h);

    sleep(Duration::from_secs(400)).await;
    assert_eq!(refresher.calls(), 0);
}
