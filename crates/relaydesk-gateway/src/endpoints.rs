use relaydesk_config::{validate_base_url, EndpointPaths, GatewayConfig};
use relaydesk_core::{RelayError, Result};
use relaydesk_session::KeyValueStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// 当前生效的网关地址和端点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub base_url: String,
    pub paths: EndpointPaths,
}

impl Endpoints {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            paths: config.endpoints.clone(),
        }
    }

    /// 校验地址可用
    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.base_url)
    }

    /// 从缓存读取，缓存缺失或损坏时返回 None
    pub fn load_cached(store: &dyn KeyValueStore, key: &str) -> Option<Self> {
        let raw = match store.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read endpoint cache");
                return None;
            }
        };

        match serde_json::from_str::<Endpoints>(&raw) {
            Ok(endpoints) if endpoints.validate().is_ok() => Some(endpoints),
            Ok(_) => {
                warn!(key = key, "Ignoring cached endpoints with invalid base URL");
                None
            }
            Err(e) => {
                warn!(key = key, error = %e, "Ignoring corrupt endpoint cache");
                None
            }
        }
    }

    pub fn save_cached(&self, store: &dyn KeyValueStore, key: &str) {
        let result = serde_json::to_string(self)
            .map_err(RelayError::from)
            .and_then(|json| store.set(key, &json));
        if let Err(e) = result {
            warn!(key = key, error = %e, "Failed to cache endpoints");
        }
    }
}

/// 端点来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSource {
    Remote,
    Cache,
    Defaults,
}

/// 远程端点配置
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RemoteEndpoints {
    #[serde(rename = "BaseUrl")]
    base_url: String,
    #[serde(rename = "Autenticacao")]
    auth: String,
    #[serde(rename = "QrCode")]
    qrcode: String,
    #[serde(rename = "Reinicializacao")]
    restart: String,
    #[serde(rename = "Desconexao")]
    disconnect: String,
    #[serde(rename = "Instancia")]
    instance: String,
    #[serde(rename = "Status")]
    status: String,
}

impl RemoteEndpoints {
    /// 解析远程响应，可能是数组（取第一项）或单个对象
    pub(crate) fn parse(body: Value) -> Result<Self> {
        let item = match body {
            Value::Array(items) => items
                .into_iter()
                .next()
                .ok_or_else(|| RelayError::NetworkFailure("empty endpoint configuration".into()))?,
            other => other,
        };
        Ok(serde_json::from_value(item)?)
    }

    /// 合并到本地端点，刷新和登出路径保留本地配置
    pub(crate) fn merge_into(self, fallback: &EndpointPaths) -> Endpoints {
        Endpoints {
            base_url: self.base_url,
            paths: EndpointPaths {
                auth: self.auth,
                qrcode: self.qrcode,
                restart: self.restart,
                disconnect: self.disconnect,
                instance: self.instance,
                status: self.status,
                ..fallback.clone()
            },
        }
    }
}
