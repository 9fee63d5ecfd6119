use serde_derive::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::path::Path;

/// Result returning Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    Config(String),
    Corruption(String),
    /// Read past the written range, or no room left for another entry.
    EndOfData,
    Internal(String),
    Io {
        op: String,
        path: String,
        message: String,
    },
    NotFound(String),
}

impl Error {
    /// Wraps an I/O failure with the operation and the file it hit.
    pub fn io(op: &str, path: &Path, err: std::io::Error) -> Self {
        Error::Io {
            op: op.to_string(),
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// True when a segment ran out of room or a read went past the end.
    pub fn is_end_of_data(&self) -> bool {
        matches!(self, Error::EndOfData)
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> fmt::Result {
        match self {
            Error::Config(s) | Error::Internal(s) => write!(f, "{}", s),
            Error::Corruption(s) => write!(f, "Corrupted log data: {}", s),
            Error::EndOfData => write!(f, "End of data"),
            Error::Io { op, path, message } => {
                write!(f, "I/O error during {} on {}: {}", op, path, message)
            }
            Error::NotFound(s) => write!(f, "Not found: {}", s),
        }
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Error::Corruption(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_op_and_file() {
        let err = Error::io(
            "open",
            Path::new("/tmp/0.store"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("open"));
        assert!(msg.contains("/tmp/0.store"));
        assert!(msg.contains("denied"));
        assert!(!err.is_end_of_data());
        assert!(Error::EndOfData.is_end_of_data());
    }
}
