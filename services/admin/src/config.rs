//! Server configuration
//!
//! Values come from environment variables layered over built-in defaults:
//! `HOST`, `PORT`, `AUTH_MODE`, `SESSION_BACKEND`, `SESSION_TTL`,
//! `LOGIN_REDIRECT`, `PASSWORD_MIGRATION` and `SESSION_COOKIE_SECURE`. Secrets are read by the
//! components that use them (`JWT_SECRET`, `SESSION_SECRET`, `DATABASE_URL`).

use anyhow::Result;
use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;

use crate::identity::AuthMode;

/// Where cookie sessions are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackendKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth_mode: AuthMode,
    pub session_backend: SessionBackendKind,
    /// Session lifetime in seconds
    pub session_ttl: u64,
    /// Where unauthenticated browsers are sent in session mode
    pub login_redirect: Option<String>,
    /// Accept and re-hash legacy plaintext passwords on login
    pub password_migration: bool,
    /// Mark the session cookie `Secure`; disable only behind plain HTTP
    pub session_cookie_secure: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let config = Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8080)?
            .set_default("auth_mode", "token")?
            .set_default("session_backend", "redis")?
            .set_default("session_ttl", 86_400)?
            .set_default("password_migration", false)?
            .set_default("session_cookie_secure", true)?
            .add_source(Environment::default().try_parsing(true))
            .build()?;

        let config: ServerConfig = config.try_deserialize()?;
        Ok(config.normalized())
    }

    fn normalized(mut self) -> Self {
        self.login_redirect = self
            .login_redirect
            .take()
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty());
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 8] = [
        "HOST",
        "PORT",
        "AUTH_MODE",
        "SESSION_BACKEND",
        "SESSION_TTL",
        "LOGIN_REDIRECT",
        "PASSWORD_MIGRATION",
        "SESSION_COOKIE_SECURE",
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = ServerConfig::from_env().unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.auth_mode, AuthMode::Token);
        assert_eq!(config.session_backend, SessionBackendKind::Redis);
        assert_eq!(config.session_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.login_redirect, None);
        assert!(!config.password_migration);
        assert!(config.session_cookie_secure);
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("PORT", "9090");
            std::env::set_var("AUTH_MODE", "session");
            std::env::set_var("SESSION_BACKEND", "memory");
            std::env::set_var("SESSION_TTL", "600");
            std::env::set_var("LOGIN_REDIRECT", "/login");
            std::env::set_var("PASSWORD_MIGRATION", "true");
            std::env::set_var("SESSION_COOKIE_SECURE", "false");
        }

        let config = ServerConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.port, 9090);
        assert_eq!(config.auth_mode, AuthMode::Session);
        assert_eq!(config.session_backend, SessionBackendKind::Memory);
        assert_eq!(config.session_ttl, 600);
        assert_eq!(config.login_redirect.as_deref(), Some("/login"));
        assert!(config.password_migration);
        assert!(!config.session_cookie_secure);
    }

    #[test]
    #[serial]
    fn test_unknown_auth_mode_is_rejected() {
        clear_env();
        unsafe {
            std::env::set_var("AUTH_MODE", "both");
        }
        let result = ServerConfig::from_env();
        clear_env();

        assert!(result.is_err());
    }
}
