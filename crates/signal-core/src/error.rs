use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
