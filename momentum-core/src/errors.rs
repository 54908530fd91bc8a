//! Scanner error types

use thiserror::Error;

/// Failure of a single endpoint fetch. Never escalated past the scan cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    Malformed(String),
}

pub type FetchResult<T> = Result<T, FetchError>;

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// A single upstream record that could not be turned into a token.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("field `{field}` is not numeric: {value}")]
    InvalidNumber { field: &'static str, value: String },
}

/// Failure while fanning a message out to subscribers.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("subscriber channel closed")]
    SubscriberClosed,

    #[error("subscriber outbound queue is full")]
    SubscriberLagging,

    #[error("failed to encode message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure of a whole scan cycle, handled at the loop boundary.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("broadcast failed: {0}")]
    Broadcast(#[from] HubError),

    #[error("scan cycle panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(FetchError::Status(429).to_string(), "unexpected HTTP status 429");
        let err = ConfigError::InvalidValue { key: "SCANNER_PORT", value: "abc".into() };
        assert_eq!(err.to_string(), "invalid value for SCANNER_PORT: \"abc\"");
    }
}
