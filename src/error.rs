use crate::dispatch::DispatchKeySet;
use crate::tensor::TensorId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LazyError>;

#[derive(Debug, Error)]
pub enum LazyError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("internal assert failed: {0}")]
    InternalAssert(String),
    #[error("no kernel registered for operator `{op}` with dispatch keys {keys:?}")]
    NoKernel {
        op: &'static str,
        keys: DispatchKeySet,
    },
    #[error("shape mismatch in `{op}`: {detail}")]
    ShapeMismatch { op: &'static str, detail: String },
    #[error("device mismatch: {0}")]
    DeviceMismatch(String),
    #[error("tensor {0:?} has no materialized data")]
    Unmaterialized(TensorId),
    #[error("unknown device `{0}`")]
    UnknownDevice(String),
    #[error("config error: {0}")]
    Config(String),
}

impl LazyError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        LazyError::InvalidState(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        LazyError::InternalAssert(message.into())
    }

    pub fn shape(op: &'static str, detail: impl Into<String>) -> Self {
        LazyError::ShapeMismatch {
            op,
            detail: detail.into(),
        }
    }

    /// Programmer errors in the surrounding system. These must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LazyError::InvalidState(_) | LazyError::InternalAssert(_)
        )
    }
}

impl From<toml::de::Error> for LazyError {
    fn from(err: toml::de::Error) -> Self {
        LazyError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal() {
        assert!(LazyError::invalid_state("exit without enter").is_fatal());
        assert!(LazyError::internal("not lazy").is_fatal());
        assert!(!LazyError::UnknownDevice("tpu".to_string()).is_fatal());
        assert!(!LazyError::shape("add", "[2] vs [3]").is_fatal());
    }

    #[test]
    fn test_display() {
        let err = LazyError::invalid_state("Attempting to exit from a lazy mode without entering");
        assert_eq!(
            err.to_string(),
            "invalid state: Attempting to exit from a lazy mode without entering"
        );
    }
}
