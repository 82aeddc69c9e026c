//! Errors shared by the persistence traits

use thiserror::Error;

/// Storage failure reported by an identity or refresh token store
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique constraint rejected the write; carries the constraint name
    #[error("Duplicate value violates {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db_err) = e.as_database_error() {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unique constraint");
                return StoreError::Duplicate(constraint.to_string());
            }
        }
        StoreError::Database(e.to_string())
    }
}
