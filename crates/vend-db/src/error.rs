//! # Database Error Types
//!
//! Two layers of error here:
//!
//! - [`DbError`] wraps `sqlx` failures and classifies the constraint
//!   violations SQLite reports as message strings (UNIQUE, FOREIGN KEY).
//!   A UNIQUE violation is the physical backstop behind every logical
//!   uniqueness check upstream.
//! - [`StoreError`] is what the services return: collect-all validation
//!   lists, checkout line violations, lost-race conflicts, or a wrapped
//!   [`DbError`]. A `Db` failure inside a transaction means the whole unit
//!   of work rolled back; prior state is exactly as before the attempt.

use thiserror::Error;

use vend_core::error::{ConflictError, CoreError, LineViolation, ValidationError};

// =============================================================================
// DbError
// =============================================================================

/// Storage-level failures.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found where one was required.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// UNIQUE constraint violation (duplicate SKU, barcode, serial,
    /// invoice number).
    #[error("duplicate {field}: already exists")]
    UniqueViolation { field: String },

    /// FOREIGN KEY constraint violation.
    #[error("foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Anything else.
    #[error("internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

/// Classify sqlx errors.
///
/// SQLite reports constraint violations as message text:
/// `UNIQUE constraint failed: <table>.<column>` and
/// `FOREIGN KEY constraint failed`.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation { field }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for plain database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// StoreError
// =============================================================================

/// Service-level result error: everything intake, selection and checkout
/// can report.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input/business-rule problems, collected so the caller sees every
    /// problem in one round trip. Nothing was persisted.
    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    /// Checkout's validation pass found stale lines; the selection is left
    /// unchanged so the caller can drop the offenders and retry.
    #[error("checkout rejected: {} line(s) failed revalidation", .0.len())]
    Rejected(Vec<LineViolation>),

    /// A lost race against another writer.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Storage failure; the surrounding unit of work was rolled back.
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        StoreError::Validation(vec![err])
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => StoreError::Validation(vec![v]),
            CoreError::Conflict(c) => StoreError::Conflict(c),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Db(DbError::from(err))
    }
}

/// Result type for service operations.
pub type StoreResult<T> = Result<T, StoreError>;

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Unit Tests
// =============================================================================
