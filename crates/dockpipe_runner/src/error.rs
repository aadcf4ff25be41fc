//! Error types for the runner module.

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur during exec relay and image operations.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Container engine unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Resource in use: {0}")]
    InUse(String),

    #[error("Corrupt multiplexed stream: {0}")]
    CorruptStream(String),

    #[error("Stream copy failed: {0}")]
    CopyFailure(#[source] std::io::Error),

    #[error("Engine reported a stream error: {0}")]
    EngineStream(String),

    #[error("Registry requested credentials but no privilege function is configured")]
    PrivilegeNotConfigured,

    #[error("Docker API error: {0}")]
    Docker(#[source] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunnerError {
    /// Whether this error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RunnerError::NotFound(_))
    }
}

impl From<bollard::errors::Error> for RunnerError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error as Bollard;

        match err {
            Bollard::DockerResponseServerError {
                status_code: 404,
                message,
            } => RunnerError::NotFound(message),
            Bollard::DockerResponseServerError {
                status_code: 409,
                message,
            } => RunnerError::InUse(message),
            Bollard::DockerResponseServerError {
                status_code: 400,
                message,
            } => RunnerError::InvalidArgument(message),
            err @ (Bollard::IOError { .. }
            | Bollard::HyperResponseError { .. }
            | Bollard::RequestTimeoutError) => RunnerError::RemoteUnavailable(err.to_string()),
            other => RunnerError::Docker(other),
        }
    }
}
