//! Command errors and their frame status codes.

use std::io::ErrorKind;

use thiserror::Error;
use tsnex_core::EngineError;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Malformed command or rejected parameter
    #[error("{0}")]
    InvalidArgument(String),

    /// Command not valid in the current session state
    #[error("{0}")]
    FailedPrecondition(String),

    /// Unknown command type or dataset
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::InvalidArgument(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::FailedPrecondition(_) => 412,
            ServiceError::Internal(_) => 500,
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Config(_)
            | EngineError::Dataset(_)
            | EngineError::Interaction(_)
            | EngineError::Serialization(_) => ServiceError::InvalidArgument(err.to_string()),
            EngineError::NotRunning | EngineError::AlreadyRunning => {
                ServiceError::FailedPrecondition(err.to_string())
            }
            EngineError::Io(ref io) if io.kind() == ErrorKind::NotFound => {
                ServiceError::NotFound(err.to_string())
            }
            EngineError::Io(_) | EngineError::Worker(_) => ServiceError::Internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_status_codes() {
        let cases = [
            (EngineError::Config("bad".into()), 400),
            (EngineError::Interaction("bad".into()), 400),
            (EngineError::NotRunning, 412),
            (EngineError::AlreadyRunning, 412),
            (EngineError::Worker("panic".into()), 500),
            (
                EngineError::Io(std::io::Error::new(ErrorKind::NotFound, "gone")),
                404,
            ),
            (
                EngineError::Io(std::io::Error::new(ErrorKind::PermissionDenied, "no")),
                500,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(ServiceError::from(err).status_code(), code);
        }
    }
}
