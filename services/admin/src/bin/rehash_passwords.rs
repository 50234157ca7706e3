//! One-shot migration: replace every stored plaintext password with an
//! Argon2 digest of the same value.

use admin::{
    password::{PasswordHasher, is_hashed},
    repositories::UserRepository,
};
use anyhow::Result;
use common::database::{self, DatabaseConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;
    let users = UserRepository::new(pool);
    let hasher = PasswordHasher::new(false);

    let mut rehashed = 0usize;
    let mut failed = 0usize;
    for (id, stored) in users.credentials().await? {
        if is_hashed(&stored) {
            continue;
        }
        let digest = match hasher.hash(&stored) {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Could not hash password of user {}: {}", id, e);
                failed += 1;
                continue;
            }
        };
        match users.set_password_hash(id, &digest).await {
            Ok(()) => rehashed += 1,
            Err(e) => {
                warn!("Could not store password of user {}: {}", id, e);
                failed += 1;
            }
        }
    }

    info!("Re-hashed {} passwords ({} failures)", rehashed, failed);
    if failed > 0 {
        anyhow::bail!("{} passwords could not be migrated", failed);
    }
    Ok(())
}
