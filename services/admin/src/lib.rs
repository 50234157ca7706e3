//! Multi-tenant administration service
//!
//! Users, roles, organizations, projects, products and object classes behind
//! token or cookie-session authentication, with every mutation recorded in
//! the `system_logs` audit trail.

pub mod audit;
pub mod config;
pub mod error;
pub mod identity;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repositories;
pub mod routes;
pub mod session;
pub mod state;
pub mod validation;

use anyhow::Result;
use common::cache::{RedisConfig, RedisPool};
use tracing::info;

use crate::{
    config::{ServerConfig, SessionBackendKind},
    identity::{AuthMode, IdentityResolver},
    jwt::{JwtConfig, JwtService},
    session::{SessionStore, cookie_key_from_env},
};

/// Build the identity resolver for the configured authentication mode
pub fn build_resolver(config: &ServerConfig) -> Result<IdentityResolver> {
    match config.auth_mode {
        AuthMode::Token => {
            let jwt_config = JwtConfig::from_env()?;
            info!("Using bearer token authentication");
            Ok(IdentityResolver::Token(JwtService::new(&jwt_config)))
        }
        AuthMode::Session => {
            let key = cookie_key_from_env()?;
            let store = match config.session_backend {
                SessionBackendKind::Redis => {
                    let pool = RedisPool::new(&RedisConfig::from_env())?;
                    SessionStore::redis(pool, config.session_ttl())
                }
                SessionBackendKind::Memory => SessionStore::memory(config.session_ttl()),
            }
            .with_secure_cookie(config.session_cookie_secure);
            info!(
                "Using cookie session authentication ({:?} backend)",
                config.session_backend
            );
            Ok(IdentityResolver::Session { store, key })
        }
    }
}
