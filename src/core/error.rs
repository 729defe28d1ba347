//! Error types for sql3wrap.
//!
//! Connection and transaction failures all surface as
//! [`Sql3Error::Database`] with a descriptive message. The remaining variants
//! cover configuration loading and non-recoverable internal faults.

use std::sync::PoisonError;
use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Sql3Error {
    /// Any failure of a connection or unit of work: open, begin, commit,
    /// rollback, prepare, bind, step, or use of an errored transaction.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration parsing and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-recoverable internal faults, such as a lock poisoned by a
    /// panicking thread.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Sql3Error {
    /// Shorthand for building a [`Sql3Error::Database`].
    pub fn database(msg: impl Into<String>) -> Self {
        Sql3Error::Database(msg.into())
    }

    /// Returns `true` for [`Sql3Error::Database`].
    pub fn is_database(&self) -> bool {
        matches!(self, Sql3Error::Database(_))
    }
}

impl<T> From<PoisonError<T>> for Sql3Error {
    fn from(err: PoisonError<T>) -> Self {
        Sql3Error::Internal(format!("lock poisoned: {}", err))
    }
}

/// Type alias for Result to use Sql3Error as the error type.
pub type Result<T> = std::result::Result<T, Sql3Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_error_display() {
        let db_err = Sql3Error::database("connection is not connected");
        assert_eq!(db_err.to_string(), "Database error: connection is not connected");
        assert!(db_err.is_database());

        let config_err = Sql3Error::Config("busy_retries must be at least 1".to_string());
        assert!(config_err.to_string().contains("Configuration error"));
        assert!(!config_err.is_database());
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Sql3Error = io_err.into();
        match err {
            Sql3Error::Io(_) => {}
            _ => panic!("Expected IO error"),
        }

        let lock = Mutex::new(0);
        let _ = std::panic::catch_unwind(|| {
            let _guard = lock.lock().unwrap();
            panic!("poison the lock");
        });
        let err: Sql3Error = lock.lock().unwrap_err().into();
        match err {
            Sql3Error::Internal(msg) => assert!(msg.contains("poisoned")),
            _ => panic!("Expected Internal error"),
        }
    }
}
