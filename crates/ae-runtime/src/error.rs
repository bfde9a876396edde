use ae_core::error::CoreReason;
use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum RuntimeReason {
    /// The principal may not read the rule group or query its datasources.
    #[error("unauthorized")]
    Unauthorized,
    /// The requested operation is switched off in configuration.
    #[error("feature disabled")]
    FeatureDisabled,
    #[error("{0}")]
    Core(CoreReason),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl RuntimeReason {
    /// Rejected request rather than engine failure.
    pub fn is_invalid_input(&self) -> bool {
        match self {
            Self::Core(c) => c.is_invalid_input(),
            _ => false,
        }
    }
}

impl ErrorCode for RuntimeReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Unauthorized => 2001,
            Self::FeatureDisabled => 2002,
            Self::Core(c) => c.error_code(),
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type RuntimeError = StructError<RuntimeReason>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
