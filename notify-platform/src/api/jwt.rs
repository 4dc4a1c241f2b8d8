//! JWT verification.
//!
//! Tokens are issued by an external identity service and signed with a
//! shared HS256 secret. The subject claim carries the numeric user id.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::JwtSettings;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User id (subject), a decimal integer
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub aud: String,
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
}

impl Claims {
    /// Numeric user id from the subject claim.
    pub fn user_id(&self) -> Result<i64, JwtError> {
        self.sub
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(JwtError::InvalidSubject)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("could not sign token: {0}")]
    TokenGeneration(String),
    #[error("token rejected: {0}")]
    TokenValidation(String),
    #[error("token expired")]
    TokenExpired,
    #[error("malformed or forged token")]
    InvalidToken,
    #[error("subject is not a user id")]
    InvalidSubject,
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::InvalidToken | ErrorKind::InvalidSignature | ErrorKind::Base64(_) => {
                Self::InvalidToken
            }
            _ => Self::TokenValidation(err.to_string()),
        }
    }
}

/// HS256 verifier for caller tokens.
///
/// Signing exists for tools and tests; production tokens come from the
/// identity service that shares the secret.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
    audience: String,
    ttl_secs: u64,
}

impl JwtService {
    pub fn new(secret: &str, issuer: Option<&str>, audience: &str, ttl_secs: Option<u64>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: issuer.map(str::to_string),
            audience: audience.to_string(),
            ttl_secs: ttl_secs.unwrap_or(3600),
        }
    }

    pub fn from_settings(settings: &JwtSettings) -> Self {
        info!(issuer = ?settings.issuer, audience = %settings.audience, "JWT verification configured");
        Self::new(&settings.secret, settings.issuer.as_deref(), &settings.audience, None)
    }

    /// Sign a token whose subject is `user_id`.
    pub fn generate_token(&self, user_id: i64, roles: Vec<String>) -> Result<String, JwtError> {
        let iat = u64::try_from(Utc::now().timestamp())
            .map_err(|e| JwtError::TokenGeneration(e.to_string()))?;
        let claims = Claims {
            sub: user_id.to_string(),
            roles,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: iat + self.ttl_secs,
            iat,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::TokenGeneration(e.to_string()))
    }

    /// Check signature, expiry, audience and, when configured, issuer.
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        Ok(decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims)
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}
