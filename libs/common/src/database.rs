//! PostgreSQL connectivity: configuration, pooling, health and migrations

use crate::error::{DatabaseError, DatabaseResult};
use sqlx::{
    PgPool,
    migrate::Migrator,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use std::{env, time::Duration};
use tracing::{error, info};

/// Database configuration struct
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Where and as whom to connect
    pub connect_options: PgConnectOptions,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections kept open
    pub min_connections: u32,
    /// Seconds to wait for a free connection
    pub connection_timeout: u64,
}

impl DatabaseConfig {
    /// Create a new DatabaseConfig from environment variables
    ///
    /// # Environment Variables
    /// - `DATABASE_URL`: full PostgreSQL URL; when absent the URL is assembled
    ///   from `DB_HOST`, `DB_PORT` (default 5432), `DB_USER`, `DB_PASSWORD`
    ///   and `DB_NAME`
    /// - `DATABASE_MAX_CONNECTIONS`: Maximum number of connections (default: 10)
    /// - `DATABASE_MIN_CONNECTIONS`: Minimum number of connections (default: 1)
    /// - `DATABASE_CONNECTION_TIMEOUT`: Acquire timeout in seconds (default: 30)
    pub fn from_env() -> DatabaseResult<Self> {
        let connect_options = match env::var("DATABASE_URL") {
            Ok(url) => url
                .parse::<PgConnectOptions>()
                .map_err(|e| DatabaseError::Configuration(format!("Invalid database URL: {}", e)))?,
            Err(_) => Self::options_from_components()?,
        };

        Ok(Self {
            connect_options,
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),
            min_connections: parse_or("DATABASE_MIN_CONNECTIONS", 1),
            connection_timeout: parse_or("DATABASE_CONNECTION_TIMEOUT", 30),
        })
    }

    fn options_from_components() -> DatabaseResult<PgConnectOptions> {
        let required = |name: &str| {
            env::var(name).map_err(|_| {
                DatabaseError::Configuration(format!(
                    "neither DATABASE_URL nor {} environment variable is set",
                    name
                ))
            })
        };

        let host = required("DB_HOST")?;
        let user = required("DB_USER")?;
        let database = required("DB_NAME")?;
        let password = env::var("DB_PASSWORD").unwrap_or_default();
        let port = parse_or("DB_PORT", 5432u16);

        Ok(PgConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&user)
            .password(&password)
            .database(&database))
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Initialize a PostgreSQL connection pool
pub async fn init_pool(config: &DatabaseConfig) -> DatabaseResult<PgPool> {
    info!("Initializing database connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .connect_with(config.connect_options.clone())
        .await
        .map_err(DatabaseError::Connection)?;

    info!("Database connection pool initialized successfully");
    Ok(pool)
}

/// Check database connectivity
///
/// Returns `Ok(false)` when the server is unreachable so callers can report
/// degraded health instead of failing.
pub async fn health_check(pool: &PgPool) -> DatabaseResult<bool> {
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => Ok(true),
        Err(e) => {
            error!("Database health check failed: {}", e);
            Ok(false)
        }
    }
}

/// Apply every pending migration embedded in `migrator`
pub async fn run_migrations(pool: &PgPool, migrator: &Migrator) -> DatabaseResult<()> {
    info!("Applying database migrations");
    migrator
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    info!("Database migrations applied");
    Ok(())
}
