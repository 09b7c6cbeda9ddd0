use relaydesk_core::{Notice, NoticeKind, NotifyLevel};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::service::AuthService;
use crate::types::ConnectionStatus;

/// 实例状态监视器
///
/// 在已认证期间按固定间隔轮询实例状态，通过 watch 通道发布最新状态。
/// 会话结束或句柄被丢弃时停止。
pub struct InstanceMonitor {
    handle: JoinHandle<()>,
    status: watch::Receiver<Option<ConnectionStatus>>,
}

impl InstanceMonitor {
    /// 启动监视器
    pub fn spawn(service: Arc<AuthService>, instance: impl Into<String>, period: Duration) -> Self {
        let instance = instance.into();
        let (sender, status) = watch::channel(None);

        let handle = tokio::spawn(async move {
            Self::poll_loop(service, instance, period, sender).await;
        });

        Self { handle, status }
    }

    /// 最近一次观察到的状态
    pub fn status(&self) -> Option<ConnectionStatus> {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ConnectionStatus>> {
        self.status.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    async fn poll_loop(
        service: Arc<AuthService>,
        instance: String,
        period: Duration,
        sender: watch::Sender<Option<ConnectionStatus>>,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(instance = %instance, period_secs = period.as_secs(), "Instance monitor started");

        loop {
            ticker.tick().await;

            if !service.session().is_authenticated() {
                info!(instance = %instance, "Session ended, stopping instance monitor");
                break;
            }

            let response = match service.poll_status(&instance).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(instance = %instance, error = %e, "Status poll failed");
                    continue;
                }
            };

            let Some(current) = response.connection_status() else {
                debug!(instance = %instance, status = %response.status, "Unrecognised instance status");
                continue;
            };

            let changed = sender.send_if_modified(|previous| {
                if *previous == Some(current) {
                    false
                } else {
                    *previous = Some(current);
                    true
                }
            });

            if changed {
                info!(instance = %instance, status = %current, "Instance status changed");
                service.notices().publish(status_notice(&instance, current));
            }
        }
    }
}

impl Drop for InstanceMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn status_notice(instance: &str, status: ConnectionStatus) -> Notice {
    let (level, title) = match status {
        ConnectionStatus::Connected => (NotifyLevel::Success, "Account connected"),
        ConnectionStatus::Connecting => (NotifyLevel::Info, "Connecting"),
        ConnectionStatus::Disconnected => (NotifyLevel::Warning, "Account disconnected"),
    };

    Notice::new(
        NoticeKind::InstanceUpdate,
        level,
        title,
        format!("Instance {} is {}.", instance, status),
    )
    .with_metadata(serde_json::json!({ "instance": instance, "status": status }))
}
