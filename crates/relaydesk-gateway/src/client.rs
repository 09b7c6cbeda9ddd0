use async_trait::async_trait;
use relaydesk_config::{join_url, EndpointPaths, GatewayConfig};
use relaydesk_core::{RelayError, Result};
use relaydesk_session::{KeyValueStore, TokenPair, TokenRefresher};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::endpoints::{EndpointSource, Endpoints, RemoteEndpoints};
use crate::types::{AuthResponse, InstanceAction, InstanceResponse};

const API_KEY_HEADER: &str = "X-API-Key";

/// 非 2xx 响应映射到的错误类型
#[derive(Debug, Clone, Copy)]
enum Rejection {
    Authentication,
    Expired,
    Network,
}

/// 网关 HTTP 客户端
///
/// 每个操作只发一次请求，不做重试。
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
    endpoints: RwLock<Endpoints>,
}

impl GatewayClient {
    /// 创建新的网关客户端
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| RelayError::Config(format!("gateway.api_key: {}", e)))?;
            headers.insert(API_KEY_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoints: RwLock::new(Endpoints::from_config(&config)),
            config,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// 当前生效的端点
    pub async fn endpoints(&self) -> Endpoints {
        self.endpoints.read().await.clone()
    }

    /// 登录
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse> {
        let url = self.url(|paths| &paths.auth).await?;
        let body = json!({ "username": username, "password": password });

        debug!(username = username, "Sending login request");
        self.post(url, &body, None, Rejection::Authentication).await
    }

    /// 用刷新令牌换取新令牌
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<AuthResponse> {
        let url = self.url(|paths| &paths.refresh).await?;
        let body = json!({ "refreshToken": refresh_token });

        debug!("Sending refresh request");
        self.post(url, &body, None, Rejection::Expired).await
    }

    /// 通知网关登出
    pub async fn logout(&self, access_token: &str) -> Result<()> {
        let url = self.url(|paths| &paths.logout).await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(rejected(response, Rejection::Network).await);
        }

        info!("Remote logout completed");
        Ok(())
    }

    /// 对实例执行操作
    pub async fn instance_action(
        &self,
        action: InstanceAction,
        instance: &str,
        access_token: Option<&str>,
    ) -> Result<InstanceResponse> {
        let url = self.url(|paths| action.path(paths)).await?;
        let body = json!({ "instancia": instance });

        debug!(action = %action, instance = instance, "Sending instance request");
        let response: InstanceResponse = self
            .post(url, &body, access_token, Rejection::Network)
            .await?;

        debug!(action = %action, instance = instance, status = %response.status, "Instance request completed");
        Ok(response)
    }

    /// 选择实例
    ///
    /// 以账号凭据绑定实例，网关返回该实例的名称、号码和连接状态。
    pub async fn select_instance(
        &self,
        username: &str,
        password: &str,
        instance: &str,
        access_token: Option<&str>,
    ) -> Result<InstanceResponse> {
        let url = self.url(|paths| &paths.instance).await?;
        let body = json!({ "username": username, "password": password, "instancia": instance });

        debug!(username = username, instance = instance, "Sending instance selection");
        let response: InstanceResponse = self
            .post(url, &body, access_token, Rejection::Authentication)
            .await?;

        debug!(instance = instance, status = %response.status, "Instance selected");
        Ok(response)
    }

    /// 查询账号可用的实例
    ///
    /// 网关可能返回实例数组，也可能只返回单个实例对象。
    pub async fn available_instances(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Vec<InstanceResponse>> {
        let url = self.url(|paths| &paths.auth).await?;
        let body = json!({ "username": username, "password": password });
        let value: Value = self.post(url, &body, None, Rejection::Authentication).await?;

        let instances = match value {
            Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value::<InstanceResponse>)
                .collect::<std::result::Result<Vec<_>, _>>()?,
            object @ Value::Object(_) => {
                let single: InstanceResponse = serde_json::from_value(object)?;
                if single.instance.is_some() {
                    vec![single]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        };

        Ok(instances
            .into_iter()
            .filter(|item| item.instance.as_deref().is_some_and(|id| !id.is_empty()))
            .collect())
    }

    /// 发现远程端点
    ///
    /// 依次尝试远程配置、本地缓存、配置文件中的默认值。远程配置获取成功时写入缓存。
    pub async fn discover_endpoints(
        &self,
        store: &dyn KeyValueStore,
        cache_key: &str,
    ) -> EndpointSource {
        let (endpoints, source) = match self.fetch_remote_endpoints().await {
            Ok(Some(endpoints)) => {
                endpoints.save_cached(store, cache_key);
                (endpoints, EndpointSource::Remote)
            }
            Ok(None) => self.cached_or_default(store, cache_key),
            Err(e) => {
                warn!(error = %e, "Endpoint discovery failed");
                self.cached_or_default(store, cache_key)
            }
        };

        info!(base_url = %endpoints.base_url, source = ?source, "Gateway endpoints resolved");
        *self.endpoints.write().await = endpoints;
        source
    }

    async fn fetch_remote_endpoints(&self) -> Result<Option<Endpoints>> {
        let Some(discovery_url) = &self.config.discovery_url else {
            return Ok(None);
        };

        let url = Url::parse(discovery_url)
            .map_err(|e| RelayError::Config(format!("gateway.discovery_url: {}", e)))?;
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(rejected(response, Rejection::Network).await);
        }

        let body: Value = response.json().await.map_err(transport_error)?;
        let endpoints = RemoteEndpoints::parse(body)?.merge_into(&self.config.endpoints);
        endpoints.validate()?;
        Ok(Some(endpoints))
    }

    fn cached_or_default(&self, store: &dyn KeyValueStore, cache_key: &str) -> (Endpoints, EndpointSource) {
        match Endpoints::load_cached(store, cache_key) {
            Some(cached) => (cached, EndpointSource::Cache),
            None => (Endpoints::from_config(&self.config), EndpointSource::Defaults),
        }
    }

    async fn url<F>(&self, select: F) -> Result<Url>
    where
        F: FnOnce(&EndpointPaths) -> &str,
    {
        let endpoints = self.endpoints.read().await;
        join_url(&endpoints.base_url, select(&endpoints.paths))
    }

    async fn post<B, T>(
        &self,
        url: Url,
        body: &B,
        bearer: Option<&str>,
        rejection: Rejection,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(rejected(response, rejection).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RelayError::NetworkFailure(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl TokenRefresher for GatewayClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let response = self.refresh_token(refresh_token).await?;

        match response.token.filter(|token| !token.is_empty()) {
            Some(access_token) => Ok(TokenPair {
                access_token,
                refresh_token: response.refresh_token.filter(|token| !token.is_empty()),
            }),
            None => {
                warn!(status = %response.status, "Refresh response did not include a token");
                Err(RelayError::SessionExpired)
            }
        }
    }
}

fn transport_error(err: reqwest::Error) -> RelayError {
    RelayError::NetworkFailure(err.to_string())
}

/// 读取错误响应中的提示信息并映射错误类型
async fn rejected(response: Response, rejection: Rejection) -> RelayError {
    let status = response.status();
    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| {
            body.get("mensagem")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| status_text(status));

    warn!(status = status.as_u16(), message = %message, "Gateway rejected request");

    match rejection {
        // 只有 401/403 表示凭据错误，其余状态码视为网关故障
        Rejection::Authentication if is_credential_rejection(status) => RelayError::AuthenticationFailure(message),
        Rejection::Authentication => RelayError::NetworkFailure(format!("HTTP {}: {}", status.as_u16(), message)),
        Rejection::Expired => RelayError::SessionExpired,
        Rejection::Network => RelayError::NetworkFailure(format!("HTTP {}: {}", status.as_u16(), message)),
    }
}

fn is_credential_rejection(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string()
}
