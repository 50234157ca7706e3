//! Shared infrastructure for the tenant administration backend
//!
//! PostgreSQL pool construction and migrations, the Redis client that backs
//! server-side sessions, and the database error taxonomy used by every
//! service in the workspace.
//!
//! ```rust,no_run
//! use common::database::{DatabaseConfig, health_check, init_pool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig::from_env()?;
//!     let pool = init_pool(&config).await?;
//!     println!("database reachable: {}", health_check(&pool).await?);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod database;
pub mod error;
