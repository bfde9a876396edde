mod frame;
mod query;
mod rule;

pub use frame::{DataResponse, Field, FieldValues, Frame, Notice, NoticeSeverity, QueryDataResponse};
pub use query::{
    AlertQuery, DatasourceQuery, QueryModel, Reducer, RelativeTimeRange, ThresholdEvaluator,
    ThresholdKind,
};
pub use rule::{AlertRule, Condition, ExecErrState, NoDataState, RuleKey, validate_interval};

/// Serialize a [`std::time::Duration`] as whole seconds.
pub(crate) mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
