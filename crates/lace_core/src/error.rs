use crate::FormattedError;
use thiserror::Error;

/// Database operation errors.
///
/// All driver operations return this error type so callers get consistent
/// handling across SQLite, PostgreSQL, and MySQL/MariaDB. Variants carrying
/// a `FormattedError` preserve structured detail/hint/code information for
/// display; the error is always attributed and human-readable, never a raw
/// pointer into backend memory.
#[derive(Debug, Error)]
pub enum DbError {
    // -- Connection errors --
    #[error("Connection failed: {0}")]
    ConnectionFailed(FormattedError),

    #[error("Authentication failed: {0}")]
    AuthFailed(FormattedError),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unknown connection id: {0}")]
    InvalidConnectionId(String),

    // -- Query errors --
    #[error("{0}")]
    QueryFailed(FormattedError),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Query timed out")]
    Timeout,

    #[error("Syntax error: {0}")]
    SyntaxError(FormattedError),

    // -- Data errors --
    #[error("Object not found: {0}")]
    ObjectNotFound(FormattedError),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(FormattedError),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    // -- Transaction errors --
    #[error("Transaction failed: {0}")]
    TransactionFailed(FormattedError),

    #[error("Deadlock detected")]
    Deadlock,

    // -- Client/infra errors --
    #[error("Permission denied: {0}")]
    PermissionDenied(FormattedError),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid connection profile: {0}")]
    InvalidProfile(String),

    #[error("Result set too large: {0} rows exceeds the configured limit")]
    ResultTooLarge(u64),

    #[error("Too many connections")]
    TooManyConnections,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DbError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(FormattedError::new(msg))
    }

    pub fn query_failed(msg: impl Into<String>) -> Self {
        Self::QueryFailed(FormattedError::new(msg))
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthFailed(FormattedError::new(msg))
    }

    pub fn constraint_violation(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation(FormattedError::new(msg))
    }

    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError(FormattedError::new(msg))
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(FormattedError::new(msg))
    }

    pub fn object_not_found(msg: impl Into<String>) -> Self {
        Self::ObjectNotFound(FormattedError::new(msg))
    }

    pub fn transaction_failed(msg: impl Into<String>) -> Self {
        Self::TransactionFailed(FormattedError::new(msg))
    }

    pub fn result_too_large(row_count: u64) -> Self {
        Self::ResultTooLarge(row_count)
    }

    /// Access the structured error information, if the variant carries one.
    pub fn formatted(&self) -> Option<&FormattedError> {
        match self {
            Self::ConnectionFailed(f)
            | Self::QueryFailed(f)
            | Self::AuthFailed(f)
            | Self::ConstraintViolation(f)
            | Self::SyntaxError(f)
            | Self::PermissionDenied(f)
            | Self::TransactionFailed(f)
            | Self::ObjectNotFound(f) => Some(f),
            _ => None,
        }
    }

    /// Whether a retry is likely to succeed without user intervention, e.g.
    /// a transient network blip rather than a bad password or bad SQL.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ConnectionFailed(f) | Self::QueryFailed(f) | Self::TransactionFailed(f) => {
                f.retriable
            }
            Self::ConnectionLost | Self::Timeout | Self::TooManyConnections => true,
            _ => false,
        }
    }

    /// Heuristic match against the auth-style error substrings the session
    /// restore flow watches for before prompting the user for a password.
    pub fn looks_like_auth_failure(&self) -> bool {
        if matches!(self, Self::AuthFailed(_)) {
            return true;
        }
        let text = self.to_string().to_lowercase();
        text.contains("password authentication failed")
            || text.contains("access denied")
            || text.contains("no password supplied")
            || text.contains("authentication failed")
    }
}
