use relaydesk_core::{Notice, NoticeBus, NoticeKind, NotifyLevel, RelayError, Result};
use relaydesk_session::{LoginDecision, RateDecision, RateLimiter, SessionController};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::GatewayClient;
use crate::types::{ConnectionStatus, InstanceAction, InstanceResponse};
use crate::validate::{validate_instance, validate_password, validate_username};

/// 没有会话主体时使用的限流标识
const GLOBAL_IDENTIFIER: &str = "global";

/// 登录结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub subject: Option<String>,
    pub role: Option<String>,
    /// 网关返回的默认实例
    pub instance: Option<String>,
    pub message: Option<String>,
}

/// 认证服务
///
/// 把网关客户端、会话控制器和限流器串起来：登录前检查锁定，
/// 受保护操作前检查认证、角色和请求频率。所有失败都会发布一条通知。
pub struct AuthService {
    client: Arc<GatewayClient>,
    session: SessionController,
    limiter: RateLimiter,
    privileged_role: Option<String>,
}

impl AuthService {
    pub fn new(client: Arc<GatewayClient>, session: SessionController, limiter: RateLimiter) -> Self {
        let privileged_role = client.config().privileged_role.clone();
        Self {
            client,
            session,
            limiter,
            privileged_role,
        }
    }

    pub fn client(&self) -> &GatewayClient {
        &self.client
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn notices(&self) -> &NoticeBus {
        self.session.notices()
    }

    /// 登录并建立会话
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome> {
        validate_username(username)
            .and_then(|_| validate_password(password))
            .map_err(|e| self.notify(e))?;

        if let Some(retry_after) = self.limiter.is_locked(username).await {
            warn!(username = username, "Login rejected, identifier locked");
            return Err(self.notify(RelayError::rate_limited(retry_after, Some(0))));
        }

        let response = match self.client.login(username, password).await {
            Ok(response) => response,
            Err(RelayError::AuthenticationFailure(reason)) => {
                return Err(self.login_failed(username, reason).await);
            }
            // 网络错误不计入失败次数
            Err(e) => return Err(self.notify(e)),
        };

        let access_token = match response.token.as_deref() {
            Some(token) if response.is_success() => token,
            _ => {
                let reason = response
                    .message
                    .clone()
                    .unwrap_or_else(|| "Invalid username or password".to_string());
                return Err(self.login_failed(username, reason).await);
            }
        };

        // 令牌无法解码时控制器已发布通知
        self.session
            .set_session(access_token, response.refresh_token.as_deref())?;
        self.limiter.track_login_attempt(username, true).await;

        let subject = self.session.subject();
        let role = self.session.role();
        info!(
            username = username,
            role = role.as_deref().unwrap_or("-"),
            "Login succeeded"
        );
        self.notices()
            .publish(Notice::login_succeeded(subject.as_deref().or(Some(username))));

        Ok(LoginOutcome {
            subject,
            role,
            instance: response.instance.clone(),
            message: response.message.clone(),
        })
    }

    /// 登出：尽力通知网关，然后清空本地会话
    pub async fn logout(&self) {
        if let Some(token) = self.session.get_token() {
            if let Err(e) = self.client.logout(&token).await {
                warn!(error = %e, "Remote logout failed, clearing local session anyway");
            }
        }
        self.session.logout();
    }

    /// 执行受保护的实例操作
    pub async fn perform(&self, action: InstanceAction, instance: &str) -> Result<InstanceResponse> {
        validate_instance(instance).map_err(|e| self.notify(e))?;
        let token = self.current_token()?;

        if action.is_privileged() {
            if let Some(required) = &self.privileged_role {
                if !self.session.has_role(required) {
                    warn!(action = %action, required = %required, "Permission denied");
                    return Err(self.notify(RelayError::PermissionDenied(required.clone())));
                }
            }
        }

        self.admit().await.map_err(|e| self.notify(e))?;
        self.session.record_activity();

        let response = self
            .client
            .instance_action(action, instance, Some(&token))
            .await
            .map_err(|e| self.notify(e))?;

        self.notices().publish(update_notice(action, instance, &response));
        Ok(response)
    }

    /// 后台轮询状态，不计为用户活动，失败也不发布通知
    pub async fn poll_status(&self, instance: &str) -> Result<InstanceResponse> {
        validate_instance(instance)?;
        let token = self.current_token()?;
        self.admit().await?;

        self.client
            .instance_action(InstanceAction::Status, instance, Some(&token))
            .await
    }

    /// 选择要管理的实例，返回网关记录的实例信息
    pub async fn select_instance(&self, username: &str, password: &str, instance: &str) -> Result<InstanceResponse> {
        validate_username(username)
            .and_then(|_| validate_password(password))
            .and_then(|_| validate_instance(instance))
            .map_err(|e| self.notify(e))?;
        let token = self.current_token()?;

        self.admit().await.map_err(|e| self.notify(e))?;
        self.session.record_activity();

        let mut response = self
            .client
            .select_instance(username, password, instance, Some(&token))
            .await
            .map_err(|e| self.notify(e))?;
        response.instance.get_or_insert_with(|| instance.to_string());

        info!(instance = instance, status = %response.status, "Instance selected");
        self.notices().publish(selection_notice(instance, &response));
        Ok(response)
    }

    /// 查询账号下的实例
    pub async fn available_instances(&self, username: &str, password: &str) -> Result<Vec<InstanceResponse>> {
        validate_username(username)
            .and_then(|_| validate_password(password))
            .map_err(|e| self.notify(e))?;

        self.client
            .available_instances(username, password)
            .await
            .map_err(|e| self.notify(e))
    }

    /// 未认证时返回错误；会话过期的通知由控制器负责
    fn current_token(&self) -> Result<String> {
        if !self.session.is_authenticated() {
            return Err(RelayError::AuthenticationFailure("not signed in".into()));
        }
        self.session
            .get_token()
            .ok_or_else(|| RelayError::AuthenticationFailure("not signed in".into()))
    }

    async fn admit(&self) -> Result<()> {
        let identifier = self
            .session
            .subject()
            .unwrap_or_else(|| GLOBAL_IDENTIFIER.to_string());

        match self.limiter.can_make_request(&identifier).await {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Blocked { retry_after } => Err(RelayError::rate_limited(retry_after, None)),
        }
    }

    async fn login_failed(&self, username: &str, reason: String) -> RelayError {
        let err = match self.limiter.track_login_attempt(username, false).await {
            LoginDecision::Locked { retry_after } => RelayError::rate_limited(retry_after, Some(0)),
            LoginDecision::Allowed { remaining_attempts } => RelayError::AuthenticationFailure(format!(
                "{} ({} {} remaining)",
                reason,
                remaining_attempts,
                if remaining_attempts == 1 { "attempt" } else { "attempts" }
            )),
        };
        warn!(username = username, error = %err, "Login failed");
        self.notify(err)
    }

    fn notify(&self, err: RelayError) -> RelayError {
        self.notices().publish(Notice::from_error(&err));
        err
    }
}

fn update_notice(action: InstanceAction, instance: &str, response: &InstanceResponse) -> Notice {
    let status = response.connection_status();
    let (level, title) = match (action, status) {
        (_, Some(ConnectionStatus::Connected)) => (NotifyLevel::Success, "Account connected"),
        (InstanceAction::QrCode, _) if response.qr_code().is_some() => (NotifyLevel::Info, "QR code ready"),
        (InstanceAction::Restart, _) => (NotifyLevel::Info, "Instance restarted"),
        (InstanceAction::Disconnect, _) => (NotifyLevel::Info, "Account disconnected"),
        _ => (NotifyLevel::Info, "Instance status updated"),
    };
    let label = status
        .map(|status| status.to_string())
        .unwrap_or_else(|| response.status.clone());

    Notice::new(
        NoticeKind::InstanceUpdate,
        level,
        title,
        format!("Instance {} is {}.", instance, label),
    )
    .with_metadata(json!({
        "action": action.as_str(),
        "instance": instance,
        "status": response.status,
    }))
}

fn selection_notice(instance: &str, response: &InstanceResponse) -> Notice {
    let label = response
        .connection_status()
        .map(|status| status.to_string())
        .unwrap_or_else(|| response.status.clone());

    Notice::new(
        NoticeKind::InstanceUpdate,
        NotifyLevel::Success,
        "Instance selected",
        format!("Now managing {} ({}).", response.name.as_deref().unwrap_or(instance), label),
    )
    .with_metadata(json!({
        "action": "select",
        "instance": instance,
        "status": response.status,
    }))
}
