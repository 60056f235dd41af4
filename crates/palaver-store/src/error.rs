use thiserror::Error;

/// Errors produced by the store layer.
///
/// The dispatcher never retries a failed operation; a persistence error is
/// reported to the sender once and otherwise isolated to that send.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Postgres/driver error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backing store unreachable or refusing work.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
