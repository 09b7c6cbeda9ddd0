use relaydesk_core::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// 远程网关配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// 网关基础地址
    pub base_url: String,

    /// 各端点路径
    pub endpoints: EndpointPaths,

    /// 远程端点发现地址（可选）
    pub discovery_url: Option<String>,

    /// 通过 `X-API-Key` 发送的密钥
    pub api_key: Option<String>,

    /// 请求超时（秒）
    pub timeout_secs: u64,

    /// 执行重启/断开操作所需的角色，未设置时不校验
    pub privileged_role: Option<String>,
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 拼接完整的端点 URL
    pub fn url_for(&self, path: &str) -> Result<Url> {
        join_url(&self.base_url, path)
    }

    /// 校验基础地址和超时
    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.base_url)?;

        if self.timeout_secs == 0 {
            return Err(RelayError::Config("gateway.timeout_secs must be greater than 0".into()));
        }

        Ok(())
    }
}

/// 把端点路径拼接到基础地址上
pub fn join_url(base_url: &str, path: &str) -> Result<Url> {
    let base = base_url.trim_end_matches('/');
    let joined = if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    };

    Url::parse(&joined).map_err(|e| RelayError::Config(format!("invalid URL '{}': {}", joined, e)))
}

/// 基础地址必须是 http 或 https
pub fn validate_base_url(base_url: &str) -> Result<()> {
    let url = Url::parse(base_url)
        .map_err(|e| RelayError::Config(format!("gateway.base_url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(RelayError::Config(format!(
            "gateway.base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }
    Ok(())
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5678/webhook".to_string(),
            endpoints: EndpointPaths::default(),
            discovery_url: None,
            api_key: None,
            timeout_secs: 10,
            privileged_role: None,
        }
    }
}

/// 端点路径
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointPaths {
    pub auth: String,
    pub refresh: String,
    pub logout: String,
    pub qrcode: String,
    pub restart: String,
    pub disconnect: String,
    pub status: String,
    pub instance: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            auth: "/auth".to_string(),
            refresh: "/refresh-token".to_string(),
            logout: "/logout".to_string(),
            qrcode: "/qrcode".to_string(),
            restart: "/restart".to_string(),
            disconnect: "/disconnect".to_string(),
            status: "/status".to_string(),
            instance: "/instancia".to_string(),
        }
    }
}
