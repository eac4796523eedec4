//! Error types for the `eventlog` crate.
//!
//! Follows the same layout as the other crates in the workspace: a root `Error`
//! struct holding an `error_kind` and the optional underlying `source`.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors raised by the event log.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// The consumer group already exists. Callers creating groups
    /// idempotently treat this as success.
    GroupExists,
    /// The consumer group (or its stream) does not exist.
    GroupNotFound,
    /// A second consumer tried to join a group dedicated to one connection.
    GroupClaimed { group: String },
    InvalidEntryId(String),
    InvalidScope(String),
    /// A stored entry could not be encoded or decoded.
    Encoding,
    Backend(BackendErrorKind),
}

/// Errors talking to the storage backend.
#[derive(Debug, PartialEq)]
pub enum BackendErrorKind {
    Unreachable,
    /// The backend accepted the command but never answered.
    Timeout,
    Protocol,
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn is_group_exists(&self) -> bool {
        self.error_kind == ErrorKind::GroupExists
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::GroupExists => write!(f, "consumer group already exists"),
            ErrorKind::GroupNotFound => write!(f, "consumer group not found"),
            ErrorKind::GroupClaimed { group } => {
                write!(f, "consumer group {group} already has a consumer")
            }
            ErrorKind::InvalidEntryId(id) => write!(f, "invalid entry id: {id}"),
            ErrorKind::InvalidScope(scope) => write!(f, "invalid stream scope: {scope}"),
            ErrorKind::Encoding => write!(f, "failed to encode or decode a log entry"),
            ErrorKind::Backend(kind) => match &self.source {
                Some(source) => write!(f, "event log backend error ({kind:?}): {source}"),
                None => write!(f, "event log backend error ({kind:?})"),
            },
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        let error_kind = match err.code() {
            Some("BUSYGROUP") => ErrorKind::GroupExists,
            Some("NOGROUP") => ErrorKind::GroupNotFound,
            _ if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() => {
                ErrorKind::Backend(BackendErrorKind::Unreachable)
            }
            _ if err.kind() == redis::ErrorKind::TypeError => ErrorKind::Encoding,
            _ => ErrorKind::Backend(BackendErrorKind::Protocol),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Encoding,
        }
    }
}

impl From<chrono::ParseError> for Error {
    fn from(err: chrono::ParseError) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Encoding,
        }
    }
}
