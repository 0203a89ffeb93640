use std::fmt;

use reqwest::StatusCode;

/// Normalized failure shape surfaced to callers of the client.
///
/// Recoverable 401s (first attempt, refresh pending) never appear here; they
/// are absorbed by the refresh coordinator and replayed.
#[derive(Debug)]
pub enum Error {
    /// The request never reached the server.
    Network(reqwest::Error),
    /// The session cannot be recovered: refresh failed, or a replayed request
    /// was rejected again with 401.
    SessionExpired,
    /// Non-2xx response carrying a structured `message` body.
    Server(StatusCode, String),
    /// Non-2xx response without a usable message body.
    Unexpected(StatusCode),
    Json(serde_json::Error),
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Network(err) => write!(f, "network unreachable: {err}"),
            Error::SessionExpired => write!(f, "session expired, please sign in again"),
            Error::Server(status, message) => write!(f, "server error ({status}): {message}"),
            Error::Unexpected(status) => write!(f, "unexpected error (status {status})"),
            Error::Json(err) => write!(f, "invalid json: {err}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Network(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Error::Config(err.to_string())
        } else if err.is_decode() {
            // The server replied; a body we cannot parse is not a
            // connectivity failure.
            Error::Unexpected(err.status().unwrap_or(StatusCode::OK))
        } else {
            Error::Network(err)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Config(err.to_string())
    }
}
