use relaydesk_config::EndpointPaths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 登录和刷新接口的响应
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, rename = "refreshToken", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// 仅供展示，角色以令牌声明为准
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, rename = "mensagem", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, rename = "instancia", skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl AuthResponse {
    /// 携带访问令牌且状态不是 error
    pub fn is_success(&self) -> bool {
        self.token.as_deref().is_some_and(|token| !token.is_empty())
            && !self.status.eq_ignore_ascii_case("error")
    }
}

impl fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse")
            .field("status", &self.status)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("role", &self.role)
            .field("message", &self.message)
            .field("instance", &self.instance)
            .finish()
    }
}

/// 实例接口的响应
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceResponse {
    #[serde(default)]
    pub status: String,

    /// 连接中时为二维码内容，否则为提示信息
    #[serde(default, rename = "mensagem", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, rename = "instancia", skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    #[serde(default, rename = "nome", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, rename = "telefone", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default, rename = "foto", skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

impl InstanceResponse {
    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        ConnectionStatus::from_gateway(&self.status)
    }

    /// 未连接时返回待扫描的二维码
    pub fn qr_code(&self) -> Option<&str> {
        match self.connection_status() {
            Some(ConnectionStatus::Connected) | None => None,
            Some(_) => self.message.as_deref().filter(|code| !code.is_empty()),
        }
    }

    pub fn formatted_phone(&self) -> Option<String> {
        self.phone.as_deref().map(format_phone)
    }
}

/// 实例连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    /// 解析网关返回的状态值
    pub fn from_gateway(status: &str) -> Option<Self> {
        match status {
            "open" => Some(ConnectionStatus::Connected),
            "close" => Some(ConnectionStatus::Disconnected),
            "connecting" => Some(ConnectionStatus::Connecting),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// 实例操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceAction {
    QrCode,
    Restart,
    Disconnect,
    Status,
}

impl InstanceAction {
    pub fn path(self, paths: &EndpointPaths) -> &str {
        match self {
            InstanceAction::QrCode => &paths.qrcode,
            InstanceAction::Restart => &paths.restart,
            InstanceAction::Disconnect => &paths.disconnect,
            InstanceAction::Status => &paths.status,
        }
    }

    /// 重启和断开需要特权角色
    pub fn is_privileged(self) -> bool {
        matches!(self, InstanceAction::Restart | InstanceAction::Disconnect)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceAction::QrCode => "qrcode",
            InstanceAction::Restart => "restart",
            InstanceAction::Disconnect => "disconnect",
            InstanceAction::Status => "status",
        }
    }
}

impl fmt::Display for InstanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qrcode" => Ok(InstanceAction::QrCode),
            "restart" => Ok(InstanceAction::Restart),
            "disconnect" => Ok(InstanceAction::Disconnect),
            "status" => Ok(InstanceAction::Status),
            other => Err(format!("unknown instance action '{}'", other)),
        }
    }
}

/// 格式化手机号：超过 10 位的纯数字号码显示为 `+CC (AA) NNNNN-NNNN`
pub fn format_phone(phone: &str) -> String {
    if phone.len() > 10 && phone.bytes().all(|b| b.is_ascii_digit()) {
        format!(
            "+{} ({}) {}-{}",
            &phone[..2],
            &phone[2..4],
            &phone[4..9],
            &phone[9..]
        )
    } else {
        phone.to_string()
    }
}
