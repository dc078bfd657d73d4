//! Error types for the tsbridge client library.
//!
//! All errors raised while translating queries, resolving RRD files or talking
//! to a backend through a transport are represented by [`TsdbError`].

use thiserror::Error;

/// The main error type for the tsbridge library.
#[derive(Error, Debug)]
pub enum TsdbError {
    /// A builder input or driver setting cannot be translated.
    ///
    /// Raised at translation time, never deferred to the transport.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The query failed validation before lowering.
    #[error("Invalid query: {message} ({details})")]
    InvalidQuery {
        /// Human-readable error message
        message: String,
        /// The offending values
        details: String,
    },

    /// A tag set could not be encoded, decoded or matched.
    #[error("Tag resolution error: {0}")]
    TagResolution(String),

    /// The transport reported a failure while talking to the backend.
    #[error("Transport error ({backend}): {message}")]
    Transport {
        /// Backend the transport was serving (e.g. "influxdb")
        backend: String,
        /// Detailed error message
        message: String,
    },

    /// A backend response could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error when an operation is not supported.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from JSON serialization/deserialization.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid glob pattern while scanning for files.
    #[error("Pattern error: {0}")]
    Pattern(String),

    /// Security-related error.
    #[error("Security error: {0}")]
    Security(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, TsdbError>`.
///
/// # Examples
///
/// ```rust
/// use tsbridge::error::Result;
///
/// fn lower() -> Result<String> {
///     Ok("cpu_usage".to_string())
/// }
/// # assert!(lower().is_ok());
/// ```
pub type Result<T> = std::result::Result<T, TsdbError>;

impl TsdbError {
    /// Creates a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a new invalid query error.
    pub fn invalid_query(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
            details: details.into(),
        }
    }

    /// Creates a new tag resolution error.
    pub fn tag_resolution(message: impl Into<String>) -> Self {
        Self::TagResolution(message.into())
    }

    /// Creates a new transport error for the given backend.
    pub fn transport(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

impl From<glob::PatternError> for TsdbError {
    fn from(err: glob::PatternError) -> Self {
        Self::Pattern(err.to_string())
    }
}

impl From<glob::GlobError> for TsdbError {
    fn from(err: glob::GlobError) -> Self {
        Self::Pattern(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<TsdbError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            TsdbError::Internal(inner) => TsdbError::Internal(format!("{msg}: {inner}")),
            other => TsdbError::Internal(format!("{msg}: {other}")),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let msg = f();
            match e.into() {
                TsdbError::Internal(inner) => TsdbError::Internal(format!("{msg}: {inner}")),
                other => TsdbError::Internal(format!("{msg}: {other}")),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error() {
        let err = TsdbError::configuration("percentile rank must be within 0..=100");
        assert_eq!(
            err.to_string(),
            "Configuration error: percentile rank must be within 0..=100"
        );
    }

    #[test]
    fn test_invalid_query_error() {
        let err = TsdbError::invalid_query("Measurement cannot be empty", "measurement: ''");
        assert_eq!(
            err.to_string(),
            "Invalid query: Measurement cannot be empty (measurement: '')"
        );
    }

    #[test]
    fn test_transport_error() {
        let err = TsdbError::transport("graphite", "connection refused");
        assert_eq!(
            err.to_string(),
            "Transport error (graphite): connection refused"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.rrd");
        let err: TsdbError = io.into();
        assert!(matches!(err, TsdbError::Io(_)));
    }

    #[test]
    fn test_error_context() {
        fn failing_operation() -> Result<()> {
            Err(TsdbError::Internal("Something went wrong".to_string()))
        }

        let result = failing_operation().context("While lowering query");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("While lowering query"));
        assert!(err.to_string().contains("Something went wrong"));
    }
}
