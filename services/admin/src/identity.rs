//! Caller identity and the two interchangeable ways of establishing it
//!
//! A deployment runs either bearer tokens or cookie sessions, chosen by
//! `AUTH_MODE`. Both resolve to the same [`Identity`], which the auth
//! middleware places in the request extensions.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use axum_extra::extract::{SignedCookieJar, cookie::Key};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    error::ApiError,
    jwt::{Claims, JwtService, TokenError},
    models::{User, UserRole},
    session::{SESSION_COOKIE, SessionError, SessionStore, removal_cookie},
};

/// Authenticated caller, available to handlers as `Extension<Identity>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub role: UserRole,
    pub org_id: Option<Uuid>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
            org_id: claims.org_id,
        }
    }
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Identity {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
            org_id: user.org_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Token,
    Session,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Token => f.write_str("token"),
            AuthMode::Session => f.write_str("session"),
        }
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "token" | "jwt" => Ok(AuthMode::Token),
            "session" | "cookie" => Ok(AuthMode::Session),
            other => Err(format!("unknown auth mode '{}'", other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthFailure {
    #[error("missing credentials")]
    Missing,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("session is invalid or expired")]
    UnknownSession,

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::Token(TokenError::Signing(e)) => ApiError::Dependency(e),
            AuthFailure::Session(e) => ApiError::Dependency(e.to_string()),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

/// What a successful login hands back to the client
pub enum LoginCredential {
    /// Bearer token for the `Authorization` header
    Token(String),
    /// Jar carrying the signed session cookie
    Session(SignedCookieJar),
}

/// Establishes caller identity for the configured [`AuthMode`]
#[derive(Clone)]
pub enum IdentityResolver {
    Token(JwtService),
    Session { store: SessionStore, key: Key },
}

impl IdentityResolver {
    pub fn mode(&self) -> AuthMode {
        match self {
            IdentityResolver::Token(_) => AuthMode::Token,
            IdentityResolver::Session { .. } => AuthMode::Session,
        }
    }

    /// Resolve the caller from request headers
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, AuthFailure> {
        match self {
            IdentityResolver::Token(jwt) => {
                let token = bearer_token(headers).ok_or(AuthFailure::Missing)?;
                Ok(jwt.verify(token)?.into())
            }
            IdentityResolver::Session { store, key } => {
                let jar = SignedCookieJar::from_headers(headers, key.clone());
                let cookie = jar.get(SESSION_COOKIE).ok_or(AuthFailure::Missing)?;
                store
                    .resolve(cookie.value())
                    .await?
                    .ok_or(AuthFailure::UnknownSession)
            }
        }
    }

    /// Mint a credential for a freshly authenticated user
    pub async fn login(&self, identity: &Identity) -> Result<LoginCredential, AuthFailure> {
        match self {
            IdentityResolver::Token(jwt) => {
                let token = jwt.issue(
                    identity.user_id,
                    &identity.username,
                    identity.role,
                    identity.org_id,
                )?;
                Ok(LoginCredential::Token(token))
            }
            IdentityResolver::Session { store, key } => {
                let handle = store.create(identity).await?;
                let jar = SignedCookieJar::new(key.clone()).add(store.cookie(handle));
                Ok(LoginCredential::Session(jar))
            }
        }
    }

    /// Invalidate the caller's credential where the server holds state.
    ///
    /// Returns the jar clearing the cookie in session mode; tokens are
    /// stateless and simply age out.
    pub async fn logout(&self, headers: &HeaderMap) -> Result<Option<SignedCookieJar>, AuthFailure> {
        match self {
            IdentityResolver::Token(_) => Ok(None),
            IdentityResolver::Session { store, key } => {
                let jar = SignedCookieJar::from_headers(headers, key.clone());
                if let Some(cookie) = jar.get(SESSION_COOKIE) {
                    store.destroy(cookie.value()).await?;
                }
                Ok(Some(jar.remove(removal_cookie())))
            }
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::JwtConfig;
    use axum::http::{
        HeaderValue,
        header::{COOKIE, SET_COOKIE},
    };
    use axum::response::IntoResponse;
    use std::time::Duration;

    fn identity(role: UserRole) -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            username: "alice".to_string(),
            role,
            org_id: Some(Uuid::new_v4()),
        }
    }

    fn token_resolver() -> IdentityResolver {
        IdentityResolver::Token(JwtService::new(&JwtConfig {
            secret: "identity-tests-secret-with-enough-bytes".to_string(),
            expiry: 3600,
        }))
    }

    fn session_resolver() -> IdentityResolver {
        IdentityResolver::Session {
            store: SessionStore::memory(Duration::from_secs(60)),
            key: Key::derive_from(b"identity-tests-session-secret-with-enough-bytes"),
        }
    }

    /// Replay the `Set-Cookie` a jar would send as a request `Cookie` header
    fn replay_cookie(jar: SignedCookieJar) -> HeaderMap {
        let response = jar.into_response();
        let set_cookie = response
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        let pair = set_cookie.split(';').next().unwrap().to_string();

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&pair).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_token_mode_round_trip() {
        let resolver = token_resolver();
        let alice = identity(UserRole::Admin);

        let LoginCredential::Token(token) = resolver.login(&alice).await.unwrap() else {
            panic!("token mode must issue a token");
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        let resolved = resolver.resolve(&headers).await.unwrap();
        assert_eq!(resolved, alice);
        assert!(resolved.is_admin());
    }

    #[tokio::test]
    async fn test_token_mode_rejects_missing_and_foreign_schemes() {
        let resolver = token_resolver();
        assert!(matches!(
            resolver.resolve(&HeaderMap::new()).await,
            Err(AuthFailure::Missing)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic YWxpY2U6cHc="));
        assert!(matches!(
            resolver.resolve(&headers).await,
            Err(AuthFailure::Missing)
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer garbage"));
        assert!(matches!(
            resolver.resolve(&headers).await,
            Err(AuthFailure::Token(TokenError::Malformed))
        ));
    }

    #[tokio::test]
    async fn test_session_mode_login_resolve_logout() {
        let resolver = session_resolver();
        let alice = identity(UserRole::User);

        let LoginCredential::Session(jar) = resolver.login(&alice).await.unwrap() else {
            panic!("session mode must set a cookie");
        };
        let headers = replay_cookie(jar);
        assert_eq!(resolver.resolve(&headers).await.unwrap(), alice);

        resolver.logout(&headers).await.unwrap();
        assert!(matches!(
            resolver.resolve(&headers).await,
            Err(AuthFailure::UnknownSession)
        ));
    }

    #[tokio::test]
    async fn test_session_cookie_is_secure_and_http_only() {
        let resolver = session_resolver();
        let LoginCredential::Session(jar) = resolver.login(&identity(UserRole::User)).await.unwrap()
        else {
            panic!("session mode must set a cookie");
        };

        let response = jar.into_response();
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.contains("Secure"));
        assert!(set_cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn test_session_mode_rejects_unsigned_cookie() {
        let resolver = session_resolver();
        resolver.login(&identity(UserRole::User)).await.unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("session_id=0123456789abcdef0123456789abcdef"),
        );
        assert!(matches!(
            resolver.resolve(&headers).await,
            Err(AuthFailure::Missing)
        ));
    }

    #[tokio::test]
    async fn test_session_mode_ignores_bearer_tokens() {
        let resolver = session_resolver();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(matches!(
            resolver.resolve(&headers).await,
            Err(AuthFailure::Missing)
        ));
    }

    #[test]
    fn test_failures_map_to_status() {
        assert!(matches!(
            ApiError::from(AuthFailure::Token(TokenError::Expired)),
            ApiError::Unauthorized(_)
        ));
        assert!(matches!(
            ApiError::from(AuthFailure::Session(SessionError::Backend("down".into()))),
            ApiError::Dependency(_)
        ));
    }

    #[test]
    fn test_auth_mode_parsing() {
        assert_eq!("session".parse::<AuthMode>().unwrap(), AuthMode::Session);
        assert_eq!("TOKEN".parse::<AuthMode>().unwrap(), AuthMode::Token);
        assert!("both".parse::<AuthMode>().is_err());
    }
}
