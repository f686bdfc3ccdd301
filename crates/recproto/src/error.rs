//! Result codes carried in Return frames.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of a dispatched call as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    Ok,
    InvalidParameter,
    InvalidOperation,
    PermissionDenied,
    OutOfMemory,
    /// Malformed request or unknown API id.
    Protocol,
    /// Engine-specific failure code passed through unchanged.
    Engine(i32),
}

impl ResultCode {
    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultCode::Ok => f.write_str("ok"),
            ResultCode::InvalidParameter => f.write_str("invalid parameter"),
            ResultCode::InvalidOperation => f.write_str("invalid operation"),
            ResultCode::PermissionDenied => f.write_str("permission denied"),
            ResultCode::OutOfMemory => f.write_str("out of memory"),
            ResultCode::Protocol => f.write_str("protocol error"),
            ResultCode::Engine(code) => write!(f, "engine error {code}"),
        }
    }
}

/// Daemon-side failure of a call. Every variant maps onto a non-Ok
/// [`ResultCode`]; the message stays in the daemon's logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("engine error {0}")]
    Engine(i32),
}

impl RecorderError {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        RecorderError::InvalidParameter(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        RecorderError::InvalidOperation(msg.into())
    }

    pub fn code(&self) -> ResultCode {
        match self {
            RecorderError::InvalidParameter(_) => ResultCode::InvalidParameter,
            RecorderError::InvalidOperation(_) => ResultCode::InvalidOperation,
            RecorderError::PermissionDenied(_) => ResultCode::PermissionDenied,
            RecorderError::OutOfMemory => ResultCode::OutOfMemory,
            RecorderError::Protocol(_) => ResultCode::Protocol,
            RecorderError::Engine(c) => ResultCode::Engine(*c),
        }
    }
}

impl From<RecorderError> for ResultCode {
    fn from(err: RecorderError) -> Self {
        err.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_codes() {
        assert_eq!(
            RecorderError::invalid_parameter("x").code(),
            ResultCode::InvalidParameter
        );
        assert_eq!(RecorderError::Engine(-42).code(), ResultCode::Engine(-42));
        assert!(!ResultCode::from(RecorderError::OutOfMemory).is_ok());
        assert!(ResultCode::Ok.is_ok());
    }
}
