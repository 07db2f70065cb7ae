//! Error taxonomy shared by the storage engine and the sync catalog.

use thiserror::Error;

/// Result type for storage and catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No record matched the request.
    #[error("not found")]
    NotFound,

    /// Ingestion rejected: only image/* and video/* are stored.
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    /// Ingestion rejected: zero-length upload.
    #[error("content is empty")]
    EmptyContent,

    /// Ingestion rejected: the name has no usable file name component.
    #[error("invalid media name")]
    InvalidName,

    /// Destination type tag is not known.
    #[error("invalid destination type: {0}")]
    InvalidType(String),

    /// Destination configuration is malformed or unreachable.
    #[error("invalid destination config: {0}")]
    InvalidConfig(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A schema migration step failed; the version counter was not advanced.
    #[error("migration step {version} failed: {source}")]
    Migration {
        version: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl Error {
    /// Returns true for failures that may succeed when retried
    /// (busy database, filesystem hiccups).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Error::Io(_) | Error::Poisoned => true,
            _ => false,
        }
    }

    /// True when a rusqlite error is a UNIQUE/constraint violation.
    pub(crate) fn is_constraint(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Poisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Io(std::io::Error::other("disk")).is_transient());
        assert!(Error::Poisoned.is_transient());
        assert!(!Error::NotFound.is_transient());
        assert!(!Error::UnsupportedType("text/plain".into()).is_transient());

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(Error::Database(busy).is_transient());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Error::EmptyContent.to_string(), "content is empty");
        assert_eq!(
            Error::UnsupportedType("text/plain".into()).to_string(),
            "unsupported content type: text/plain"
        );
    }
}
