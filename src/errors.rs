//! errors.rs
//! Errores de dominio del ejecutor.
//! Los "skips" gobernados y los replays NO son errores: viajan como
//! `ExecutionOutcome` (ver models/execution_model.rs).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("verification failed: {0}")]
    Verification(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("audit write failed: {0}")]
    Audit(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Devuelve true si el error de sqlx es una violación de UNIQUE.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Devuelve true si el error de sqlx es una violación de CHECK.
pub fn is_check_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_check_violation(),
        _ => false,
    }
}
