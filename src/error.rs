//! Packaging error types.

use std::path::PathBuf;
use thiserror::Error;

pub type PackResult<T> = Result<T, PackError>;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source file not found: {path}")]
    MissingSource { path: PathBuf },

    #[error("failed to clear destination {path} after {attempts} attempts: {source}")]
    CleanupFailed {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("destination '{destination}' is claimed by both {first} and {second}")]
    DuplicateDestination {
        destination: String,
        first: String,
        second: String,
    },

    #[error("entry synthesizer produced '{actual}' but the naming policy reserved '{expected}'")]
    EntryNameMismatch { expected: String, actual: String },

    #[error("archive error at {path}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("invalid request for function '{name}': {reason}")]
    InvalidRequest { name: String, reason: String },

    #[error("packaging worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("packaging function '{name}' failed: {source}")]
    Function {
        name: String,
        #[source]
        source: Box<PackError>,
    },
}

impl PackError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an I/O error for a read of an input file.
    ///
    /// `NotFound` is promoted to [`PackError::MissingSource`] so callers can
    /// tell a missing input apart from other filesystem failures. Output-side
    /// failures go through [`PackError::io`].
    pub fn source_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::MissingSource { path };
        }
        Self::Io { path, source }
    }

    /// Create an archive codec error
    pub fn archive(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_request(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Attach the identity of the function being packaged.
    pub fn for_function(self, name: impl Into<String>) -> Self {
        match self {
            already @ Self::Function { .. } => already,
            other => Self::Function {
                name: name.into(),
                source: Box::new(other),
            },
        }
    }
}
