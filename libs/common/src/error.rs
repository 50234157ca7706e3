//! Database error taxonomy shared by the services

use sqlx::Error as SqlxError;
use thiserror::Error;

/// SQLSTATE raised by PostgreSQL when a unique index rejects a row
const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE raised when a row still references (or would reference) a missing parent
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Failure while talking to PostgreSQL
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The pool could not reach the server
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// A statement failed
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Applying the embedded migrations failed
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Connection settings are missing or unusable
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Whether `err` was raised by a unique index (duplicate key)
pub fn is_unique_violation(err: &SqlxError) -> bool {
    match err {
        SqlxError::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

/// Whether `err` was raised by a foreign key constraint
pub fn is_foreign_key_violation(err: &SqlxError) -> bool {
    match err {
        SqlxError::Database(db_err) => db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&SqlxError::RowNotFound));
        assert!(!is_unique_violation(&SqlxError::PoolTimedOut));
        assert!(!is_foreign_key_violation(&SqlxError::RowNotFound));
    }

    #[test]
    fn test_configuration_error_message() {
        let err = DatabaseError::Configuration("DB_HOST is not set".to_string());
        assert_eq!(
            err.to_string(),
            "Database configuration error: DB_HOST is not set"
        );
    }
}
