use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Connection pool error: {0}")]
    ConnectionError(#[from] diesel::r2d2::PoolError),
    #[error("Database error: {0}")]
    DatabaseError(#[from] diesel::result::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
