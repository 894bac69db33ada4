use thiserror::Error;

/// Main error type for kbrag
#[derive(Error, Debug)]
pub enum KbragError {
    /// User, knowledge base, vector collection or BM25 index missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Precondition failure on the inbound document (e.g. wrong file type)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate document name within a knowledge base
    #[error("Conflict: {0}")]
    Conflict(String),

    /// File system I/O errors
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Malformed document content
    #[error("Parse error: {0}")]
    Parse(String),

    /// Embedding / context-generation / other external service failure
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Vector-store database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenient Result type using KbragError
pub type Result<T> = std::result::Result<T, KbragError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KbragError::Conflict("paper.pdf already exists".to_string());
        assert!(err.to_string().contains("Conflict"));
        assert!(err.to_string().contains("paper.pdf"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KbragError = io_err.into();
        assert!(matches!(err, KbragError::Storage(_)));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let db_err = rusqlite::Error::InvalidQuery;
        let err: KbragError = db_err.into();
        assert!(matches!(err, KbragError::Database(_)));
    }
}
