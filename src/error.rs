use crate::call::ConnectionState;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("output buffer too small: need {needed} samples, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Failures reported by a device backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("all line channels busy")]
    ChannelsBusy,
    #[error("unknown line token {0}")]
    UnknownToken(u64),
    #[error("not supported by backend: {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Failure(String),
}

/// Reason a dial request did not produce a connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DialError {
    #[error("no capable device for this number")]
    NoCapableDevice,
    #[error("line unavailable")]
    LineUnavailable,
    #[error("no network connectivity")]
    NoConnectivity,
    #[error("invalid number: {0:?}")]
    InvalidNumber(String),
    #[error("backend failure: {0}")]
    BackendFailure(String),
}

impl From<BackendError> for DialError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::ChannelsBusy => DialError::LineUnavailable,
            other => DialError::BackendFailure(other.to_string()),
        }
    }
}

/// Failures of commands addressed to an existing connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("operation not valid in state {0}")]
    InvalidState(ConnectionState),
    #[error("connection is no longer served")]
    UnknownConnection,
    #[error("backend failure: {0}")]
    BackendFailure(String),
    #[error("recording failed: {0}")]
    Recording(String),
    #[error("invalid dtmf digit {0:?}")]
    InvalidDigit(char),
}

impl From<BackendError> for ControlError {
    fn from(err: BackendError) -> Self {
        ControlError::BackendFailure(err.to_string())
    }
}

pub type PickupError = ControlError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_mapping() {
        assert_eq!(
            DialError::from(BackendError::ChannelsBusy),
            DialError::LineUnavailable
        );
        assert_eq!(
            DialError::from(BackendError::Failure("rejected".to_string())),
            DialError::BackendFailure("rejected".to_string())
        );
        assert_eq!(
            ControlError::InvalidState(ConnectionState::Active).to_string(),
            "operation not valid in state active"
        );
    }
}
