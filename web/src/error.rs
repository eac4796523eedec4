use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use eventlog::{BackendErrorKind, Error as EventLogError, ErrorKind};
use log::*;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(EventLogError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html#associatedconstant.UNPROCESSABLE_ENTITY
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self.0.error_kind {
            ErrorKind::InvalidScope(_) | ErrorKind::InvalidEntryId(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string()).into_response()
            }
            ErrorKind::GroupNotFound => (StatusCode::NOT_FOUND, "NOT FOUND").into_response(),
            ErrorKind::GroupExists | ErrorKind::GroupClaimed { .. } => {
                (StatusCode::CONFLICT, "CONFLICT").into_response()
            }
            ErrorKind::Backend(BackendErrorKind::Unreachable | BackendErrorKind::Timeout) => {
                error!("Event log unreachable: {}", self.0);
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE UNAVAILABLE").into_response()
            }
            ErrorKind::Backend(_) | ErrorKind::Encoding => {
                error!("Event log error: {}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<EventLogError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
