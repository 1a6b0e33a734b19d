use thiserror::Error;

/// A task payload that can never succeed. Logged and dropped, never retried.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Payload is missing the server key")]
    EmptyServerKey,

    #[error("Payload is missing the world URL for server {0}")]
    EmptyUrl(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Server {server} is not in timezone {timezone}")]
    TimezoneMismatch { server: String, timezone: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown server status: {0}")]
pub struct UnknownStatus(pub String);
