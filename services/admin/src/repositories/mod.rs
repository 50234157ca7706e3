//! PostgreSQL access for every entity
//!
//! Reads only ever see live rows (`deleted_at IS NULL`). Multi-row writes run
//! in a transaction that is committed on success and rolled back explicitly
//! on the first failing step.

pub mod object_class;
pub mod organization;
pub mod product;
pub mod project;
pub mod role;
pub mod user;

use common::error::{is_foreign_key_violation, is_unique_violation};
use sqlx::{PgConnection, Postgres, Transaction};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub use object_class::ObjectClassRepository;
pub use organization::OrganizationRepository;
pub use product::ProductRepository;
pub use project::ProjectRepository;
pub use role::RoleRepository;
pub use user::UserRepository;

#[derive(Error, Debug)]
pub enum RepositoryError {
    /// A uniqueness rule would be broken
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    /// The write is refused: dangling reference or live dependents
    #[error("{0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Classify a failed insert/update by the constraint that rejected it
pub(crate) fn write_error(err: sqlx::Error, conflict: &str) -> RepositoryError {
    if is_unique_violation(&err) {
        RepositoryError::Conflict(conflict.to_string())
    } else if is_foreign_key_violation(&err) {
        RepositoryError::Invalid("Referenced record does not exist or is still in use".to_string())
    } else {
        RepositoryError::Database(err)
    }
}

/// Commit `tx` if `result` succeeded, otherwise roll it back
pub(crate) async fn finish<T>(
    tx: Transaction<'_, Postgres>,
    result: RepositoryResult<T>,
) -> RepositoryResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("Failed to roll back transaction: {}", rollback);
            }
            Err(e)
        }
    }
}

/// Lock a live row for the rest of the transaction
pub(crate) async fn lock_live(
    conn: &mut PgConnection,
    table: &'static str,
    id: Uuid,
    missing: &str,
) -> RepositoryResult<()> {
    let sql = format!(
        "SELECT id FROM {} WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        table
    );
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| RepositoryError::NotFound(missing.to_string()))
}

/// Lock a row whether or not it is soft-deleted
pub(crate) async fn lock_any(
    conn: &mut PgConnection,
    table: &'static str,
    id: Uuid,
    missing: &str,
) -> RepositoryResult<()> {
    let sql = format!("SELECT id FROM {} WHERE id = $1 FOR UPDATE", table);
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| RepositoryError::NotFound(missing.to_string()))
}

/// Refuse with `Invalid(message)` when `sql` (bound to `id`) counts any row
pub(crate) async fn ensure_none(
    conn: &mut PgConnection,
    sql: &str,
    id: Uuid,
    message: &str,
) -> RepositoryResult<()> {
    let count: i64 = sqlx::query_scalar(sql)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    if count > 0 {
        return Err(RepositoryError::Invalid(message.to_string()));
    }
    Ok(())
}

/// Mark a locked row deleted
pub(crate) async fn mark_deleted(
    conn: &mut PgConnection,
    table: &'static str,
    id: Uuid,
) -> RepositoryResult<()> {
    let sql = format!(
        "UPDATE {} SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1",
        table
    );
    sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(())
}

/// Remove a locked row for good
pub(crate) async fn remove(
    conn: &mut PgConnection,
    table: &'static str,
    id: Uuid,
) -> RepositoryResult<()> {
    let sql = format!("DELETE FROM {} WHERE id = $1", table);
    sqlx::query(&sql)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                RepositoryError::Invalid(
                    "Record is still referenced, including by deleted records".to_string(),
                )
            } else {
                RepositoryError::Database(e)
            }
        })?;
    Ok(())
}

/// `%text%` for ILIKE, with the user's wildcards matched literally
pub fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("login"), "%login%");
        assert_eq!(like_pattern("100%_done\\"), "%100\\%\\_done\\\\%");
    }

    #[test]
    fn test_non_constraint_errors_stay_database_errors() {
        assert!(matches!(
            write_error(sqlx::Error::RowNotFound, "dup"),
            RepositoryError::Database(_)
        ));
    }
}
