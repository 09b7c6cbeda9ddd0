use anyhow::{Context as _, Result};
use relaydesk_config::AppConfig;
use relaydesk_core::{Notice, NoticeBus, NotifyLevel, SharedClock, SystemClock};
use relaydesk_gateway::{AuthService, GatewayClient};
use relaydesk_session::{FileStore, RateLimiter, SessionController};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_SESSION_FILE: &str = "session.json";

/// 命令执行上下文
pub struct Context {
    pub service: Arc<AuthService>,
    notices: broadcast::Receiver<Notice>,
}

impl Context {
    /// 组装存储、网关客户端、会话控制器和限流器
    pub async fn build(config: AppConfig, config_dir: &Path) -> Result<Self> {
        let session_path = session_path(&config, config_dir);
        debug!(path = ?session_path, "Opening session store");
        let store = Arc::new(
            FileStore::open(&session_path)
                .with_context(|| format!("failed to open session file {}", session_path.display()))?,
        );

        let client = Arc::new(GatewayClient::new(config.gateway.clone())?);
        if config.gateway.discovery_url.is_some() {
            client
                .discover_endpoints(store.as_ref(), &config.storage.endpoints_cache_key)
                .await;
        }

        let clock: SharedClock = Arc::new(SystemClock);
        let bus = NoticeBus::default();
        let notices = bus.subscribe();

        let session = SessionController::new(
            config.session.clone(),
            store,
            client.clone(),
            clock.clone(),
            bus,
        );
        let limiter = RateLimiter::new(config.rate_limit.clone(), clock);

        Ok(Self {
            service: Arc::new(AuthService::new(client, session, limiter)),
            notices,
        })
    }

    /// 把积压的通知打印到标准错误
    pub fn report_notices(&mut self) {
        while let Ok(notice) = self.notices.try_recv() {
            eprintln!("{}", render_notice(&notice));
        }
    }
}

/// 会话文件路径，相对路径基于配置目录
pub fn session_path(config: &AppConfig, config_dir: &Path) -> PathBuf {
    match &config.storage.session_file {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => config_dir.join(path),
        None => config_dir.join(DEFAULT_SESSION_FILE),
    }
}

pub fn render_notice(notice: &Notice) -> String {
    let level = match notice.level {
        NotifyLevel::Info => "info",
        NotifyLevel::Success => "ok",
        NotifyLevel::Warning => "warn",
        NotifyLevel::Error => "error",
    };
    format!("[{}] {}: {}", level, notice.title, notice.message)
}
