//! HS256 JSON Web Tokens.
//!
//! Tokens are `base64url(header).base64url(claims).base64url(hmac)` where the
//! MAC is HMAC-SHA256 over the first two segments. Only `HS256` is accepted
//! on the way back in.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::AuthConfig;
use crate::db::models::{User, UserRole};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub role: UserRole,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm")]
    UnsupportedAlgorithm,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("wrong token kind")]
    WrongKind,
    #[error("token encoding failed")]
    Encoding,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in milliseconds.
    pub expires_in: i64,
}

pub struct TokenService {
    key: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            key: secret.to_vec(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.jwt_secret.as_bytes(),
            Duration::minutes(config.access_token_minutes),
            Duration::days(config.refresh_token_days),
        )
    }

    pub fn issue(
        &self,
        user_id: &str,
        email: &str,
        role: UserRole,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            kind,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: uuid::Uuid::now_v7().to_string(),
        };
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };

        let header = serde_json::to_vec(&header).map_err(|_| TokenError::Encoding)?;
        let claims = serde_json::to_vec(&claims).map_err(|_| TokenError::Encoding)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let signature = self.sign(signing_input.as_bytes())?;
        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
    }

    pub fn issue_pair(&self, user: &User, now: DateTime<Utc>) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue(&user.id, &user.email, user.role, TokenKind::Access, now)?,
            refresh_token: self.issue(&user.id, &user.email, user.role, TokenKind::Refresh, now)?,
            token_type: "Bearer",
            expires_in: self.access_ttl.num_milliseconds(),
        })
    }

    pub fn verify(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(TokenError::UnsupportedAlgorithm);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::Encoding)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: Claims = decode_segment(claims_b64)?;
        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        if claims.kind != expected {
            return Err(TokenError::WrongKind);
        }
        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, TokenError> {
        // new_from_slice accepts any key length for HMAC
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::Encoding)?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}
