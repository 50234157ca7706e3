use admin::{
    build_resolver, config::ServerConfig, password::PasswordHasher, routes, state::AppState,
};
use anyhow::Result;
use common::database::{self, DatabaseConfig};
use sqlx::migrate::Migrator;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting admin service");

    let config = ServerConfig::from_env()?;

    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;

    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    database::run_migrations(&pool, &MIGRATOR).await?;

    let resolver = build_resolver(&config)?;
    let hasher = PasswordHasher::new(config.password_migration);
    if hasher.legacy_plaintext() {
        warn!("Legacy plaintext passwords are accepted and re-hashed on login");
    }

    let app_state = AppState::new(pool, resolver, hasher, config.login_redirect.clone());
    let app = routes::create_router(app_state);

    let address = config.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!("Admin service listening on {}", address);

    axum::serve(listener, app).await?;

    Ok(())
}
