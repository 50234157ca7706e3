//! Server-side cookie sessions
//!
//! The browser only holds an opaque random handle in a signed cookie; the
//! identity it maps to lives in Redis (or in process memory for single-node
//! and test deployments) and expires server-side after the configured TTL.

use anyhow::Result;
use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use common::cache::RedisPool;
use rand::RngCore;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::identity::Identity;

/// Name of the cookie carrying the session handle
pub const SESSION_COOKIE: &str = "session_id";
const MIN_SECRET_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session backend error: {0}")]
    Backend(String),

    #[error("session record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Where session records are kept
#[derive(Clone)]
pub enum SessionBackend {
    Redis(RedisPool),
    Memory(Arc<Mutex<HashMap<String, (String, Instant)>>>),
}

#[derive(Clone)]
pub struct SessionStore {
    backend: SessionBackend,
    ttl: Duration,
    secure_cookie: bool,
}

impl SessionStore {
    pub fn redis(pool: RedisPool, ttl: Duration) -> Self {
        Self {
            backend: SessionBackend::Redis(pool),
            ttl,
            secure_cookie: true,
        }
    }

    pub fn memory(ttl: Duration) -> Self {
        Self {
            backend: SessionBackend::Memory(Arc::new(Mutex::new(HashMap::new()))),
            ttl,
            secure_cookie: true,
        }
    }

    /// Allow the cookie over plain HTTP; for deployments without TLS only
    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.secure_cookie = secure;
        self
    }

    /// Cookie delivering `handle` to the browser
    pub fn cookie(&self, handle: String) -> Cookie<'static> {
        session_cookie(handle, self.secure_cookie)
    }

    /// Bind `identity` to a new handle and return the handle
    pub async fn create(&self, identity: &Identity) -> Result<String, SessionError> {
        let handle = new_handle();
        let record = serde_json::to_string(identity)?;

        match &self.backend {
            SessionBackend::Redis(pool) => pool
                .set_ex(&redis_key(&handle), &record, self.ttl.as_secs().max(1))
                .await
                .map_err(|e| SessionError::Backend(e.to_string()))?,
            SessionBackend::Memory(map) => {
                let mut map = map.lock().await;
                let now = Instant::now();
                map.retain(|_, (_, expires_at)| *expires_at > now);
                map.insert(handle.clone(), (record, now + self.ttl));
            }
        }

        info!("Created session for user: {}", identity.username);
        Ok(handle)
    }

    /// Look up a live session
    pub async fn resolve(&self, handle: &str) -> Result<Option<Identity>, SessionError> {
        let record = match &self.backend {
            SessionBackend::Redis(pool) => pool
                .get(&redis_key(handle))
                .await
                .map_err(|e| SessionError::Backend(e.to_string()))?,
            SessionBackend::Memory(map) => {
                let mut map = map.lock().await;
                let now = Instant::now();
                let live = map
                    .get(handle)
                    .filter(|(_, expires_at)| *expires_at > now)
                    .map(|(record, _)| record.clone());
                if live.is_none() {
                    map.remove(handle);
                }
                live
            }
        };

        match record {
            Some(record) => Ok(Some(serde_json::from_str(&record)?)),
            None => Ok(None),
        }
    }

    /// Invalidate a handle; unknown handles are ignored
    pub async fn destroy(&self, handle: &str) -> Result<(), SessionError> {
        match &self.backend {
            SessionBackend::Redis(pool) => {
                pool.delete(&redis_key(handle))
                    .await
                    .map_err(|e| SessionError::Backend(e.to_string()))?;
            }
            SessionBackend::Memory(map) => {
                map.lock().await.remove(handle);
            }
        }
        Ok(())
    }
}

fn redis_key(handle: &str) -> String {
    format!("session:{}", handle)
}

fn new_handle() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Cookie carrying `handle`
pub fn session_cookie(handle: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, handle))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

/// Cookie that clears the session handle on the client
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

/// Derive the cookie signing key from `SESSION_SECRET`
pub fn cookie_key_from_env() -> Result<Key> {
    let secret = std::env::var("SESSION_SECRET")
        .map_err(|_| anyhow::anyhow!("SESSION_SECRET environment variable not set"))?;
    cookie_key(&secret)
}

pub fn cookie_key(secret: &str) -> Result<Key> {
    if secret.len() < MIN_SECRET_LEN {
        anyhow::bail!("SESSION_SECRET must be at least {} bytes long", MIN_SECRET_LEN);
    }
    Ok(Key::derive_from(secret.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use uuid::Uuid;

    fn identity() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            username: "alice".to_string(),
            role: UserRole::User,
            org_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_resolve_destroy() {
        let store = SessionStore::memory(Duration::from_secs(60));
        let identity = identity();

        let handle = store.create(&identity).await.unwrap();
        assert_eq!(handle.len(), 64);
        assert!(handle.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        assert_eq!(store.resolve(&handle).await.unwrap(), Some(identity));

        store.destroy(&handle).await.unwrap();
        assert_eq!(store.resolve(&handle).await.unwrap(), None);
        // Destroying twice is harmless
        store.destroy(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_handles_are_unique() {
        let store = SessionStore::memory(Duration::from_secs(60));
        let identity = identity();
        let first = store.create(&identity).await.unwrap();
        let second = store.create(&identity).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_expired_sessions_do_not_resolve() {
        let store = SessionStore::memory(Duration::from_millis(20));
        let handle = store.create(&identity()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.resolve(&handle).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_handle_is_absent() {
        let store = SessionStore::memory(Duration::from_secs(60));
        assert_eq!(store.resolve("nope").await.unwrap(), None);
    }

    #[test]
    fn test_cookie_attributes() {
        let cookie = session_cookie("abc".to_string(), true);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }

    #[test]
    fn test_store_cookies_are_secure_unless_disabled() {
        let store = SessionStore::memory(Duration::from_secs(60));
        assert_eq!(store.cookie("abc".to_string()).secure(), Some(true));

        let plain = store.with_secure_cookie(false);
        assert_ne!(plain.cookie("abc".to_string()).secure(), Some(true));
    }

    #[test]
    fn test_short_secret_is_rejected() {
        assert!(cookie_key("too short").is_err());
        assert!(cookie_key("a-session-secret-that-is-at-least-32-bytes").is_ok());
    }
}
