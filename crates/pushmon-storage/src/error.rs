/// Errors surfaced by durable batch stores.
///
/// The in-memory store and controller never fail; only crash-recovery backends
/// behind [`crate::durable::DurableStore`] report errors.
///
/// # Examples
///
/// ```rust
/// use pushmon_storage::error::StorageError;
///
/// let err = StorageError::Backend("disk full".to_string());
/// assert!(err.to_string().contains("disk full"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O failure in a file-like backend.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure not covered by other variants.
    #[error("Storage: {0}")]
    Backend(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
