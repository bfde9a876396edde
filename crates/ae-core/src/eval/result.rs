use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::labels::Labels;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Verdict of one evaluation, and the lifecycle state of an alert instance.
///
/// Evaluation only ever produces `Normal`, `Alerting`, `NoData` or `Error`;
/// `Pending` is introduced by the state manager while a `for` duration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum State {
    #[default]
    Normal,
    Pending,
    Alerting,
    NoData,
    Error,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Pending => "Pending",
            Self::Alerting => "Alerting",
            Self::NoData => "NoData",
            Self::Error => "Error",
        }
    }

    /// Anything but `Normal` keeps an alert open.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EvaluationResult
// ---------------------------------------------------------------------------

/// A number observed on one node while producing a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberCapture {
    pub var: String,
    pub labels: Labels,
    pub value: Option<f64>,
}

/// Verdict for one label set of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Labels identifying the series; empty for NoData/Error without series.
    pub instance: Labels,
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub evaluated_at: DateTime<Utc>,
    #[serde(skip)]
    pub evaluation_duration: Duration,
    /// Keyed by RefID.
    #[serde(default)]
    pub values: BTreeMap<String, NumberCapture>,
    #[serde(default)]
    pub evaluation_string: String,
}

impl EvaluationResult {
    pub fn new(instance: Labels, state: State, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            instance,
            state,
            error: None,
            evaluated_at,
            evaluation_duration: Duration::ZERO,
            values: BTreeMap::new(),
            evaluation_string: String::new(),
        }
    }

    /// The single `Error` result a failed evaluation collapses into.
    pub fn from_error(message: impl Into<String>, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(Labels::new(), State::Error, evaluated_at)
        }
    }

    /// Numeric values only, as stored on alert instances.
    pub fn numeric_values(&self) -> BTreeMap<String, f64> {
        self.values
            .iter()
            .filter_map(|(k, c)| c.value.map(|v| (k.clone(), v)))
            .collect()
    }
}

/// `[ var='A' labels={host=a} value=3 ], [ var='B' ... ]`
pub(crate) fn evaluation_string(values: &BTreeMap<String, NumberCapture>) -> String {
    values
        .values()
        .map(|c| {
            let value = match c.value {
                Some(v) => v.to_string(),
                None => "null".to_string(),
            };
            format!("[ var='{}' labels={} value={} ]", c.var, c.labels, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}
