use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::eval::State;
use crate::labels::{Fingerprint, Labels};
use crate::model::RuleKey;

use super::image::Image;

/// Why an instance is in its state when the verdict alone does not say.
pub mod reason {
    pub const NO_DATA: &str = "NoData";
    pub const ERROR: &str = "Error";
    pub const MISSING_SERIES: &str = "MissingSeries";
    pub const KEEP_LAST: &str = "KeepLast";
    pub const RULE_DELETED: &str = "RuleDeleted";

    /// `"NoData, KeepLast"`
    pub fn concat(first: &str, second: &str) -> String {
        format!("{first}, {second}")
    }
}

/// One tracked alert: a rule evaluated against one resolved label set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertInstance {
    pub rule_key: RuleKey,
    pub fingerprint: Fingerprint,
    pub labels: Labels,
    pub annotations: Labels,
    pub state: State,
    /// Empty when the verdict explains the state on its own.
    pub state_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Start of the current state episode.
    pub starts_at: DateTime<Utc>,
    /// Set when the instance returned to Normal; cleared while active.
    pub ends_at: Option<DateTime<Utc>>,
    pub last_evaluation_time: DateTime<Utc>,
    #[serde(skip)]
    pub evaluation_duration: Duration,
    pub values: BTreeMap<String, f64>,
    pub last_evaluation_string: String,
    /// Fingerprint of the evaluation labels, before rule and reserved
    /// labels were merged in.
    pub result_fingerprint: Fingerprint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    /// The transition that produced this snapshot ended an alert.
    pub resolved: bool,
    /// Removed after its series stopped being returned.
    pub stale: bool,
    #[serde(skip)]
    pub(crate) missed_evaluations: u32,
    #[serde(skip)]
    pub(crate) last_missed_at: Option<DateTime<Utc>>,
}

impl AlertInstance {
    /// A never-evaluated instance in `Normal`.
    pub fn new(rule_key: RuleKey, labels: Labels, at: DateTime<Utc>) -> Self {
        Self {
            rule_key,
            fingerprint: labels.fingerprint(),
            labels,
            annotations: Labels::new(),
            state: State::Normal,
            state_reason: String::new(),
            error: None,
            starts_at: at,
            ends_at: None,
            last_evaluation_time: at,
            evaluation_duration: Duration::ZERO,
            values: BTreeMap::new(),
            last_evaluation_string: String::new(),
            result_fingerprint: Labels::new().fingerprint(),
            image: None,
            resolved: false,
            stale: false,
            missed_evaluations: 0,
            last_missed_at: None,
        }
    }

    /// `"Alerting"`, or `"Normal (MissingSeries)"` when a reason is set.
    pub fn display_state(&self) -> String {
        if self.state_reason.is_empty() {
            self.state.to_string()
        } else {
            format!("{} ({})", self.state, self.state_reason)
        }
    }

    pub(super) fn enter(&mut self, state: State, at: DateTime<Utc>) {
        if self.state != state {
            self.starts_at = at;
        }
        self.state = state;
        if state.is_active() {
            self.ends_at = None;
        }
    }

    /// Move to `Normal`, stamping `ends_at` and `resolved` when leaving an
    /// active state.
    pub(super) fn end(&mut self, at: DateTime<Utc>) {
        if self.state.is_active() {
            self.resolved = matches!(self.state, State::Alerting | State::NoData | State::Error);
            self.ends_at = Some(at);
            self.starts_at = at;
        }
        self.state = State::Normal;
    }
}

/// Change of one instance during one cycle. Snapshots are owned so later
/// cycles never alter a transition already handed out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub previous: AlertInstance,
    pub current: AlertInstance,
    pub at: DateTime<Utc>,
}

impl StateTransition {
    pub fn changed(&self) -> bool {
        self.previous.state != self.current.state
            || self.previous.state_reason != self.current.state_reason
    }
}
