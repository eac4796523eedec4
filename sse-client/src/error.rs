//! Error types for the SSE client.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// The connection could not be opened or broke mid-stream.
    Transport,
    /// The server answered with a non-success status.
    HttpStatus(u16),
    /// The server answered with something other than `text/event-stream`.
    ContentType(String),
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Transport => match &self.source {
                Some(source) => write!(f, "transport error: {source}"),
                None => write!(f, "transport error"),
            },
            ErrorKind::HttpStatus(status) => write!(f, "server responded with status {status}"),
            ErrorKind::ContentType(content_type) => {
                write!(f, "unexpected content type {content_type:?}")
            }
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

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = match err.status() {
            Some(status) => ErrorKind::HttpStatus(status.as_u16()),
            None => ErrorKind::Transport,
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
