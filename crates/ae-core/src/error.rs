use derive_more::From;
use orion_error::prelude::*;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    /// Malformed condition, bad time range or interval. Rejected before any
    /// query runs.
    #[error("validation error")]
    Validation,
    /// Query backend failure, timeout or cancellation.
    #[error("execution error")]
    Execution,
    /// Backtest span exceeds configured bounds.
    #[error("resource limit exceeded")]
    ResourceLimit,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl CoreReason {
    /// Whether the error was caused by caller input rather than by the
    /// engine or its collaborators.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::Validation | Self::ResourceLimit)
    }
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Validation => 1001,
            Self::Execution => 1002,
            Self::ResourceLimit => 1003,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;

/// Shorthand for a [`CoreReason::Validation`] error with a detail message.
pub(crate) fn validation(detail: impl Into<String>) -> CoreError {
    StructError::from(CoreReason::Validation).with_detail(detail.into())
}

/// Shorthand for a [`CoreReason::Execution`] error with a detail message.
pub(crate) fn execution(detail: impl Into<String>) -> CoreError {
    StructError::from(CoreReason::Execution).with_detail(detail.into())
}
