//! Client error types.

use std::fmt;

use thiserror::Error;

/// "Lock wait timeout exceeded; try restarting transaction".
pub const ER_LOCK_WAIT_TIMEOUT: u32 = 1205;

/// "Deadlock found when trying to get lock; try restarting transaction".
pub const ER_LOCK_DEADLOCK: u32 = 1213;

/// Whether a server error code is safe to retry by resubmitting the
/// identical statement.
///
/// Only lock-wait timeouts and deadlocks qualify: the server guarantees the
/// failed attempt had no side effect, so the statement can be resent
/// unchanged without producing incorrect results.
#[must_use]
pub fn retryable(code: u32) -> bool {
    matches!(code, ER_LOCK_WAIT_TIMEOUT | ER_LOCK_DEADLOCK)
}

/// Server-side diagnostics captured from the native driver's error
/// accessors: numeric code, SQLSTATE, and message text.
///
/// A `code` of 0 means the driver reported no error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDiag {
    /// Numeric server error code (0 = no error).
    pub code: u32,
    /// Five-character SQLSTATE, when the driver supplies one.
    pub sqlstate: String,
    /// Human-readable message text.
    pub message: String,
}

impl ServerDiag {
    /// Create diagnostics from the three driver accessors.
    #[must_use]
    pub fn new(code: u32, sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            sqlstate: sqlstate.into(),
            message: message.into(),
        }
    }

    /// True if the driver reported no error.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for ServerDiag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code == 0 {
            return write!(f, "no server diagnostics");
        }
        write!(f, "server error {}", self.code)?;
        if !self.sqlstate.is_empty() {
            write!(f, " [{}]", self.sqlstate)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection establishment failed at a specific step.
    ///
    /// The native handle is always released before this error is raised.
    #[error("connection failed ({step}): {diag}")]
    Connect {
        /// The step that failed (option setting, connect, post-connect setup).
        step: &'static str,
        /// Server diagnostics at the point of failure.
        diag: ServerDiag,
    },

    /// Statement preparation failed.
    #[error("prepare {sql:?}: {diag}")]
    Prepare {
        /// The SQL text that failed to compile.
        sql: String,
        /// Server diagnostics.
        diag: ServerDiag,
    },

    /// A text query failed with a non-retryable error.
    #[error("query {sql:?}: {diag}")]
    Query {
        /// The SQL text that failed.
        sql: String,
        /// Server diagnostics.
        diag: ServerDiag,
    },

    /// A prepared-statement operation failed.
    #[error("statement {op}: {diag}")]
    Statement {
        /// The operation that failed (bind, execute, fetch, ...).
        op: &'static str,
        /// Statement-level server diagnostics.
        diag: ServerDiag,
    },

    /// An out-of-band long-data chunk was rejected by the server.
    #[error("failed to send long data chunk of {bytes} bytes: {diag}")]
    LongData {
        /// Size of the rejected chunk.
        bytes: usize,
        /// Statement-level server diagnostics.
        diag: ServerDiag,
    },

    /// A row-returning query produced no result set.
    #[error("no result set for {sql:?}")]
    NoResult {
        /// The SQL text.
        sql: String,
    },

    /// A statement expected to change rows affected none.
    #[error("zero affected rows by {sql:?}")]
    ZeroAffected {
        /// The SQL text.
        sql: String,
    },

    /// A row was returned but its value could not be parsed.
    ///
    /// Distinct from "no row returned", which scalar helpers represent as a
    /// normal outcome (empty string / `None`).
    #[error("{what} is not valid: {value:?}")]
    Parse {
        /// What was being parsed.
        what: &'static str,
        /// The offending value text.
        value: String,
    },

    /// The server answered with something the client cannot interpret.
    #[error("unexpected server response: {0}")]
    Unexpected(String),
}

impl Error {
    /// Check whether this error carries a retryable server code.
    ///
    /// Retryable codes (lock-wait timeout, deadlock) are normally consumed
    /// by the internal retry loops and never surface; this predicate exists
    /// for callers running their own loops over [`ServerDiag`] codes.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.diag().is_some_and(|d| retryable(d.code))
    }

    /// Server diagnostics attached to this error, if any.
    #[must_use]
    pub fn diag(&self) -> Option<&ServerDiag> {
        match self {
            Self::Connect { diag, .. }
            | Self::Prepare { diag, .. }
            | Self::Query { diag, .. }
            | Self::Statement { diag, .. }
            | Self::LongData { diag, .. } => Some(diag),
            Self::NoResult { .. }
            | Self::ZeroAffected { .. }
            | Self::Parse { .. }
            | Self::Unexpected(_) => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_codes() {
        assert!(retryable(ER_LOCK_WAIT_TIMEOUT));
        assert!(retryable(ER_LOCK_DEADLOCK));
        assert!(!retryable(0));
        assert!(!retryable(1062)); // duplicate key
    }

    #[test]
    fn diag_display() {
        let diag = ServerDiag::new(1213, "40001", "Deadlock found");
        assert_eq!(
            diag.to_string(),
            "server error 1213 [40001]: Deadlock found"
        );
        assert_eq!(ServerDiag::default().to_string(), "no server diagnostics");
    }

    #[test]
    fn error_display_carries_context() {
        let err = Error::Query {
            sql: "select 1".into(),
            diag: ServerDiag::new(1064, "42000", "syntax error"),
        };
        let text = err.to_string();
        assert!(text.contains("select 1"));
        assert!(text.contains("1064"));
        assert!(text.contains("syntax error"));
    }

    #[test]
    fn error_retryable_predicate() {
        let deadlock = Error::Query {
            sql: "update t".into(),
            diag: ServerDiag::new(ER_LOCK_DEADLOCK, "40001", "Deadlock found"),
        };
        assert!(deadlock.is_retryable());

        let parse = Error::Parse {
            what: "unsigned integer",
            value: "abc".into(),
        };
        assert!(!parse.is_retryable());
    }
}
