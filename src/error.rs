//! Error and Result types.

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::io;

use crate::message::{Notice, PgSeverity};

macro_rules! err_protocol {
    ($($args:tt)*) => {
        $crate::error::Error::Protocol(format!($($args)*))
    };
}

/// A specialized `Result` type for pglink.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All the ways a connection or protocol operation can fail.
///
/// The variants distinguish transport, protocol, server, configuration, and
/// cancellation failures so callers can tell the fatal kinds (transport and
/// protocol errors leave the connection unusable) from server errors, which
/// preserve the session once it resynchronizes on `ReadyForQuery`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Error occurred while parsing connection options.
    #[error("error with configuration: {0}")]
    Configuration(#[source] Box<dyn StdError + Send + Sync>),

    /// Error communicating with the server.
    #[error("error communicating with the server: {0}")]
    Io(#[from] io::Error),

    /// Error writing queued data to the server.
    ///
    /// `safe_to_retry` is `true` only if no bytes of the current operation
    /// reached the socket, meaning the operation may be replayed on a new
    /// connection without risk of double execution.
    #[error("error writing to the server: {source}")]
    Write {
        #[source]
        source: io::Error,
        safe_to_retry: bool,
    },

    /// Error occurred while attempting to establish a TLS connection.
    #[error("error during TLS upgrade: {0}")]
    Tls(#[source] Box<dyn StdError + Send + Sync>),

    /// Unexpected or invalid data was received from the server.
    ///
    /// Always fatal to the connection: after a framing or sequencing error
    /// there is no way to find the next message boundary.
    #[error("encountered unexpected or invalid data: {0}")]
    Protocol(String),

    /// An error was returned by the server.
    #[error("error returned from the server: {0}")]
    Database(#[source] Box<PgDatabaseError>),

    /// The server requested an authentication method this crate does not
    /// implement.
    #[error("unsupported authentication method: {0}")]
    UnsupportedAuthMethod(String),

    /// Authentication failed before the server reported a structured error.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A read or write deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// The operation was interrupted by the connection's cancellation
    /// watcher. The connection must be closed; the protocol state is
    /// unknown.
    #[error("operation canceled")]
    Canceled,

    /// The connection was closed, or a previous fatal error left it
    /// unusable.
    #[error("connection is unusable")]
    Closed,
}

impl Error {
    #[inline]
    pub(crate) fn config(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Error::Configuration(err.into())
    }

    #[inline]
    pub(crate) fn tls(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Error::Tls(err.into())
    }

    /// Returns the server error, if this is [`Error::Database`].
    pub fn as_database_error(&self) -> Option<&PgDatabaseError> {
        match self {
            Error::Database(err) => Some(err),
            _ => None,
        }
    }

    /// `true` if no part of the failed operation can have reached the
    /// server, so the operation may be safely retried elsewhere.
    pub fn is_safe_to_retry(&self) -> bool {
        matches!(
            self,
            Error::Write {
                safe_to_retry: true,
                ..
            }
        )
    }

    /// `true` for errors that leave the connection unusable: transport and
    /// protocol failures, cancellation, and explicit closure.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Database(_))
    }
}

impl From<Notice> for Error {
    fn from(notice: Notice) -> Self {
        Error::Database(Box::new(PgDatabaseError(notice)))
    }
}

/// An error returned from the PostgreSQL server, decoded from an
/// `ErrorResponse` message.
///
/// The connection remains usable after a server error once the protocol
/// resynchronizes on the next `ReadyForQuery`.
pub struct PgDatabaseError(pub(crate) Notice);

// Error field tags:
// https://www.postgresql.org/docs/current/protocol-error-fields.html
impl PgDatabaseError {
    pub fn severity(&self) -> PgSeverity {
        self.0.severity()
    }

    /// The SQLSTATE code for this error.
    pub fn code(&self) -> &str {
        self.0.code()
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        self.0.message()
    }

    pub fn detail(&self) -> Option<&str> {
        self.0.get(b'D')
    }

    pub fn hint(&self) -> Option<&str> {
        self.0.get(b'H')
    }

    /// Error cursor position (in characters) into the original query.
    pub fn position(&self) -> Option<usize> {
        self.0.get(b'P').and_then(|s| s.parse().ok())
    }

    /// Error cursor position into an internally generated query.
    pub fn internal_position(&self) -> Option<usize> {
        self.0.get(b'p').and_then(|s| s.parse().ok())
    }

    /// The text of a failed internally generated command.
    pub fn internal_query(&self) -> Option<&str> {
        self.0.get(b'q')
    }

    /// Call stack context in which the error occurred.
    pub fn r#where(&self) -> Option<&str> {
        self.0.get(b'W')
    }

    pub fn schema(&self) -> Option<&str> {
        self.0.get(b's')
    }

    pub fn table(&self) -> Option<&str> {
        self.0.get(b't')
    }

    pub fn column(&self) -> Option<&str> {
        self.0.get(b'c')
    }

    pub fn data_type(&self) -> Option<&str> {
        self.0.get(b'd')
    }

    pub fn constraint(&self) -> Option<&str> {
        self.0.get(b'n')
    }

    /// Source file in the server where the error was reported.
    pub fn file(&self) -> Option<&str> {
        self.0.get(b'F')
    }

    pub fn line(&self) -> Option<usize> {
        self.0.get(b'L').and_then(|s| s.parse().ok())
    }

    pub fn routine(&self) -> Option<&str> {
        self.0.get(b'R')
    }
}

impl Debug for PgDatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgDatabaseError")
            .field("severity", &self.severity())
            .field("code", &self.code())
            .field("message", &self.message())
            .field("detail", &self.detail())
            .field("hint", &self.hint())
            .field("position", &self.position())
            .field("where", &self.r#where())
            .field("schema", &self.schema())
            .field("table", &self.table())
            .field("column", &self.column())
            .field("data_type", &self.data_type())
            .field("constraint", &self.constraint())
            .field("file", &self.file())
            .field("line", &self.line())
            .field("routine", &self.routine())
            .finish()
    }
}

impl Display for PgDatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl StdError for PgDatabaseError {}
