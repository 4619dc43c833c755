//! Unified error types for pixmirror.

use tokio_rusqlite::rusqlite;

/// Unified error types for the caching proxy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// Invalid or unsupported source URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// HTTP request failed or returned a non-success status.
    #[error("http error: {0}")]
    Http(String),

    /// Fetch timed out.
    #[error("fetch timed out: {0}")]
    FetchTimeout(String),

    /// Fetch response exceeded the configured byte cap.
    #[error("response too large: {0}")]
    FetchTooLarge(String),

    /// Fetched bytes could not be decoded as an image.
    #[error("image decode failed: {0}")]
    ImageDecode(String),

    /// Artifact could not be encoded or written.
    #[error("image encode failed: {0}")]
    ImageEncode(String),

    /// Filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidUrl("ftp://example.com".to_string());
        assert!(err.to_string().contains("invalid url"));
        assert!(err.to_string().contains("ftp://example.com"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
