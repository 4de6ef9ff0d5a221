//! Error types for cellhost-core.

use thiserror::Error;

/// Result type for cellhost-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cellhost-core.
#[derive(Debug, Error)]
pub enum Error {
    /// A native value has no wire representation.
    #[error("unable to pack value of type: {0}")]
    UnpackableType(String),

    /// A wire package is structurally invalid.
    #[error("malformed package: {0}")]
    MalformedPackage(String),

    /// A cell was submitted to a context of another language.
    #[error("cell language \"{found}\" does not match context language \"{expected}\"")]
    LanguageMismatch { expected: String, found: String },

    /// A declared cell input was not given a value.
    #[error("input \"{0}\" has no value")]
    MissingInput(String),

    /// No instance type is registered under this name.
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// No instance lives at this address.
    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    /// The instance has no such method.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Method arguments could not be decoded.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Failure inside the embedded Python interpreter.
    #[error("Python error: {0}")]
    Python(String),

    /// Failure inside the SQLite engine.
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding error.
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Delimited text error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is caused by misuse of the API rather than by a
    /// failure inside the host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownType(_)
                | Error::UnknownInstance(_)
                | Error::UnknownMethod(_)
                | Error::InvalidArguments(_)
                | Error::MalformedPackage(_)
                | Error::Json(_)
        )
    }
}

#[cfg(feature = "python")]
impl From<pyo3::PyErr> for Error {
    fn from(e: pyo3::PyErr) -> Self {
        Error::Python(e.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Sqlite(crate::context::sqlite::engine_message(e))
    }
}
