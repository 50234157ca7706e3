//! Integration tests for the infrastructure components
//!
//! These need a PostgreSQL server reachable through `DATABASE_URL` (or the
//! `DB_*` variables) and a Redis server at `REDIS_URL`.

use common::{
    cache::{RedisConfig, RedisPool},
    database::{DatabaseConfig, health_check, init_pool},
};
use sqlx::Row;

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn test_infrastructure_integration() -> Result<(), Box<dyn std::error::Error>> {
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    assert!(health_check(&pool).await?, "Database health check failed");

    let row = sqlx::query("SELECT 1 as result").fetch_one(&pool).await?;
    let result: i32 = row.get("result");
    assert_eq!(result, 1, "PostgreSQL simple query test failed");

    let redis_pool = RedisPool::new(&RedisConfig::from_env())?;
    assert!(
        redis_pool.health_check().await?,
        "Redis health check failed"
    );

    redis_pool
        .set_ex("integration_test_key", "integration_test_value", 10)
        .await?;
    assert_eq!(
        redis_pool.get("integration_test_key").await?,
        Some("integration_test_value".to_string())
    );

    redis_pool.delete("integration_test_key").await?;
    assert_eq!(redis_pool.get("integration_test_key").await?, None);

    Ok(())
}
