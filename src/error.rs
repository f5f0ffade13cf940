//! Error types for zero-pg-copy.

use thiserror::Error;

/// Result type for zero-pg-copy operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error/notice field types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Severity, preferring the non-localized variant.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        if let Some(where_) = &self.where_ {
            write!(f, "\nCONTEXT: {}", where_)?;
        }
        Ok(())
    }
}

/// Error type for zero-pg-copy.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Protocol error (malformed message, unexpected message code, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// COPY was aborted locally and the server never acknowledged it
    #[error("COPY aborted: {0}")]
    CopyAborted(String),

    /// Invalid usage (e.g., writing after finish)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken => true,
            Error::Server(fields) => {
                // FATAL and PANIC errors indicate connection is broken
                matches!(fields.severity(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            _ => None,
        }
    }

    /// Connection closed by the peer while an operation was in flight.
    pub fn unexpected_eof() -> Self {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "Connection terminated unexpectedly",
        ))
    }

    /// Duplicate the error for a second observer (e.g. the dispatcher and the operation).
    ///
    /// I/O errors lose their source and keep only kind and message.
    pub fn duplicate(&self) -> Self {
        match self {
            Error::Server(fields) => Error::Server(fields.clone()),
            Error::Protocol(msg) => Error::Protocol(msg.clone()),
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
            Error::ConnectionBroken => Error::ConnectionBroken,
            Error::CopyAborted(msg) => Error::CopyAborted(msg.clone()),
            Error::InvalidUsage(msg) => Error::InvalidUsage(msg.clone()),
        }
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_server_error_breaks_connection() {
        let fields = ErrorFields {
            severity: Some("FATAL".into()),
            message: Some("terminating connection".into()),
            ..Default::default()
        };
        assert!(Error::Server(fields).is_connection_broken());

        let fields = ErrorFields {
            severity: Some("ERROR".into()),
            code: Some("22P02".into()),
            ..Default::default()
        };
        let err = Error::Server(fields);
        assert!(!err.is_connection_broken());
        assert_eq!(err.sqlstate(), Some("22P02"));
    }

    #[test]
    fn display_includes_detail() {
        let fields = ErrorFields {
            severity: Some("ERROR".into()),
            message: Some("COPY from stdin failed: boom".into()),
            code: Some("57014".into()),
            detail: Some("more".into()),
            ..Default::default()
        };
        assert_eq!(
            fields.to_string(),
            "ERROR: COPY from stdin failed: boom (SQLSTATE 57014)\nDETAIL: more"
        );
    }
}
