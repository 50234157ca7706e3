//! Token service: HS256-signed, time-bound bearer tokens
//!
//! A token carries the caller's identity and role. There is no refresh or
//! revocation; a fresh login is the only way to obtain a new token.

use anyhow::Result;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::models::UserRole;

/// Default token lifetime: 24 hours
pub const DEFAULT_EXPIRY_SECONDS: u64 = 86_400;
const MIN_SECRET_LEN: usize = 32;

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Process-wide HMAC secret
    pub secret: String,
    /// Token lifetime in seconds
    pub expiry: u64,
}

impl JwtConfig {
    /// Create a new JwtConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_SECRET`: signing secret, at least 32 bytes
    /// - `JWT_EXPIRY`: token lifetime in seconds (default: 86400)
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable not set"))?;

        if secret.len() < MIN_SECRET_LEN {
            anyhow::bail!("JWT_SECRET must be at least {} bytes long", MIN_SECRET_LEN);
        }

        let expiry = std::env::var("JWT_EXPIRY")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_EXPIRY_SECONDS);

        Ok(JwtConfig { secret, expiry })
    }
}

/// JWT claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: Uuid,
    pub username: String,
    pub role: UserRole,
    pub org_id: Option<Uuid>,
    /// Issued at (unix seconds)
    pub iat: u64,
    /// Expires at (unix seconds)
    pub exp: u64,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token is malformed")]
    Malformed,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiry: u64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        // Clock skew is not compensated
        validation.leeway = 0;

        JwtService {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            expiry: config.expiry,
        }
    }

    /// Issue a token valid from now for the configured lifetime
    pub fn issue(
        &self,
        user_id: Uuid,
        username: &str,
        role: UserRole,
        org_id: Option<Uuid>,
    ) -> Result<String, TokenError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TokenError::Signing(e.to_string()))?
            .as_secs();
        self.issue_at(user_id, username, role, org_id, now)
    }

    /// Issue a token as if the current time were `issued_at`
    pub fn issue_at(
        &self,
        user_id: Uuid,
        username: &str,
        role: UserRole,
        org_id: Option<Uuid>,
        issued_at: u64,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            role,
            org_id,
            iat: issued_at,
            exp: issued_at + self.expiry,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Check signature and expiry and return the claims
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                other => {
                    warn!("Rejecting unparseable token: {:?}", other);
                    TokenError::Malformed
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SECRET: &str = "an-hmac-secret-that-is-long-enough-for-tests";

    fn service() -> JwtService {
        JwtService::new(&JwtConfig {
            secret: SECRET.to_string(),
            expiry: DEFAULT_EXPIRY_SECONDS,
        })
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn test_issue_then_verify() {
        let service = service();
        let user_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();

        let token = service
            .issue(user_id, "alice", UserRole::Admin, Some(org_id))
            .unwrap();
        let claims = service.verify(&token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, UserRole::Admin);
        assert_eq!(claims.org_id, Some(org_id));
        assert_eq!(claims.exp - claims.iat, DEFAULT_EXPIRY_SECONDS);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let service = service();
        let issued_at = now() - DEFAULT_EXPIRY_SECONDS - 60;
        let token = service
            .issue_at(Uuid::new_v4(), "alice", UserRole::User, None, issued_at)
            .unwrap();

        assert_eq!(service.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_altered_signature_is_rejected() {
        let service = service();
        let token = service
            .issue(Uuid::new_v4(), "alice", UserRole::User, None)
            .unwrap();

        let (payload, signature) = token.rsplit_once('.').unwrap();
        let replacement = if signature.starts_with('A') { "B" } else { "A" };
        let tampered = format!("{}.{}{}", payload, replacement, &signature[1..]);

        assert_eq!(service.verify(&tampered), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_token_from_another_secret_is_rejected() {
        let other = JwtService::new(&JwtConfig {
            secret: "a-completely-different-secret-of-32-bytes".to_string(),
            expiry: DEFAULT_EXPIRY_SECONDS,
        });
        let token = other
            .issue(Uuid::new_v4(), "mallory", UserRole::Admin, None)
            .unwrap();

        assert_eq!(service().verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let service = service();
        assert_eq!(service.verify("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(service.verify("a.b.c"), Err(TokenError::Malformed));
        assert_eq!(service.verify(""), Err(TokenError::Malformed));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        unsafe {
            std::env::set_var("JWT_SECRET", SECRET);
            std::env::set_var("JWT_EXPIRY", "604800");
        }
        let config = JwtConfig::from_env().unwrap();
        assert_eq!(config.secret, SECRET);
        assert_eq!(config.expiry, 604_800);

        unsafe {
            std::env::remove_var("JWT_EXPIRY");
        }
        assert_eq!(JwtConfig::from_env().unwrap().expiry, DEFAULT_EXPIRY_SECONDS);

        unsafe {
            std::env::set_var("JWT_SECRET", "short");
        }
        assert!(JwtConfig::from_env().is_err());

        unsafe {
            std::env::remove_var("JWT_SECRET");
        }
        assert!(JwtConfig::from_env().is_err());
    }
}
