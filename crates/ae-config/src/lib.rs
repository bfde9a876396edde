pub mod alerting;
pub mod logging;
pub mod types;
mod validate;

pub use alerting::{
    AlertingConfig, BacktestingConfig, DISABLEABLE_RESERVED_LABELS, EvaluationConfig,
    FeatureFlags, ReservedLabelsConfig,
};
pub use logging::{LogFormat, LoggingConfig};
pub use types::HumanDuration;
