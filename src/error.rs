use std::error::Error as StdError;

use thiserror::Error;

/// voxflow's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// voxflow's crate-wide error type.
///
/// Variants correspond to the error kinds of the job lifecycle, not to Rust types: a
/// `RuntimeError` on one chunk degrades that chunk's result, while an `InputError` or
/// `ResourceError` is job-fatal. This is intentionally decoupled from `anyhow` so downstream
/// callers aren't forced to adopt `anyhow` in their own public APIs.
#[derive(Debug, Error)]
pub enum Error {
    /// Unsupported format, corrupt bytes, empty upload, or size/duration over limit.
    /// The job never enters `processing`.
    #[error("input error: {0}")]
    Input(String),

    /// Model load failure across all strategies, device OOM, or disk full.
    #[error("resource error: {0}")]
    Resource(String),

    /// Inference failure on a specific chunk. Recorded on the `ChunkResult`; never
    /// propagated past the chunk transcriber.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Cooperative cancellation requested by the caller. Carries no message: per the
    /// cancellation contract no response body is produced for a cancelled job.
    #[error("job was cancelled")]
    Cancelled,

    /// Notifier network failure. Always swallowed by the orchestrator; never fails a job.
    #[error("transient external error: {0}")]
    TransientExternal(String),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn transient_external(message: impl Into<String>) -> Self {
        Self::TransientExternal(message.into())
    }

    /// A short message suitable for a job's `error_message` field or a notifier payload.
    pub fn user_message(&self) -> String {
        match self {
            Error::Cancelled => String::new(),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Runtime(format!("{err:#}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::Other(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_has_empty_user_message() {
        assert_eq!(Error::Cancelled.user_message(), "");
    }

    #[test]
    fn input_error_preserves_message() {
        let err = Error::input("file.xyz is not a supported format");
        assert!(err.user_message().contains("file.xyz"));
    }
}
