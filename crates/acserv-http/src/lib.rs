//! HTTP/1.x layer of the gateway
//!
//! Request parsing, the in-memory [`ResponseRecorder`], and the
//! [`RouteTable`] with the login page, auth and static file handlers.

pub mod portal;
pub mod recorder;
pub mod request;
pub mod routes;
pub mod static_files;

pub use recorder::ResponseRecorder;
pub use request::{
    logical_path, normalize_target, read_request, request_wants_close, RequestLimits,
};
pub use routes::{Route, RouteTable};

use thiserror::Error;

/// Errors raised while reading a request or writing a response
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("Request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Connection closed in the middle of a request")]
    Incomplete,

    #[error("Invalid request: {0}")]
    Invalid(String),
}

impl From<http::Error> for HttpError {
    fn from(e: http::Error) -> Self {
        HttpError::Invalid(e.to_string())
    }
}
