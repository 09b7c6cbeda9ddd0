use jsonwebtoken::{decode, DecodingKey, Validation};
use relaydesk_core::{RelayError, Result};
use serde::{Deserialize, Serialize};

/// 访问令牌中的声明
///
/// 客户端只读取声明，不校验签名；签名由网关负责校验。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// 过期时间（秒级 Unix 时间戳）
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl TokenClaims {
    /// 过期时间（毫秒）
    pub fn expires_at_ms(&self) -> i64 {
        self.exp.saturating_mul(1000)
    }
}

/// 解码访问令牌
pub fn decode_claims(token: &str) -> Result<TokenClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| RelayError::AuthenticationFailure(format!("invalid access token: {}", e)))?;

    Ok(data.claims)
}
