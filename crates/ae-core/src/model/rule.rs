use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, validation};
use crate::labels::Labels;

use super::query::AlertQuery;
use super::serde_secs;

// ---------------------------------------------------------------------------
// RuleKey
// ---------------------------------------------------------------------------

/// Identity of a rule across the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    pub org_id: i64,
    pub uid: String,
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "org_id={} rule_uid={}", self.org_id, self.uid)
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// What an instance becomes when its query returns no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoDataState {
    Alerting,
    #[default]
    NoData,
    #[serde(rename = "OK")]
    Ok,
    KeepLast,
}

/// What an instance becomes when its queries fail to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecErrState {
    Alerting,
    #[default]
    Error,
    #[serde(rename = "OK")]
    Ok,
    KeepLast,
}

impl NoDataState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alerting => "Alerting",
            Self::NoData => "NoData",
            Self::Ok => "OK",
            Self::KeepLast => "KeepLast",
        }
    }
}

impl ExecErrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alerting => "Alerting",
            Self::Error => "Error",
            Self::Ok => "OK",
            Self::KeepLast => "KeepLast",
        }
    }
}

impl FromStr for NoDataState {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "Alerting" => Ok(Self::Alerting),
            "NoData" => Ok(Self::NoData),
            "OK" => Ok(Self::Ok),
            "KeepLast" => Ok(Self::KeepLast),
            other => Err(validation(format!("unknown NoData state option {other:?}"))),
        }
    }
}

impl FromStr for ExecErrState {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "Alerting" => Ok(Self::Alerting),
            "Error" => Ok(Self::Error),
            "OK" => Ok(Self::Ok),
            "KeepLast" => Ok(Self::KeepLast),
            other => Err(validation(format!("unknown Exec Error state option {other:?}"))),
        }
    }
}

impl fmt::Display for NoDataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ExecErrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A query/expression graph plus the RefID whose output is the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub condition: String,
    pub data: Vec<AlertQuery>,
}

impl Condition {
    pub fn node(&self, ref_id: &str) -> Option<&AlertQuery> {
        self.data.iter().find(|q| q.ref_id == ref_id)
    }

    /// Structural checks that must pass before anything is executed.
    pub fn validate(&self) -> CoreResult<()> {
        if self.data.is_empty() {
            return Err(validation(
                "condition must contain at least one query or expression",
            ));
        }
        if self.condition.is_empty() {
            return Err(validation("condition name is empty"));
        }

        let mut seen = HashSet::with_capacity(self.data.len());
        for q in &self.data {
            if q.ref_id.is_empty() {
                return Err(validation("query with empty RefID"));
            }
            if !seen.insert(q.ref_id.as_str()) {
                return Err(validation(format!("duplicate RefID {:?}", q.ref_id)));
            }
        }

        if !seen.contains(self.condition.as_str()) {
            let mut ids: Vec<&str> = seen.into_iter().collect();
            ids.sort_unstable();
            return Err(validation(format!(
                "condition {:?} does not exist, must be one of {:?}",
                self.condition, ids
            )));
        }

        if !self.data.iter().any(AlertQuery::is_data_query) {
            return Err(validation(
                "condition must contain at least one datasource query",
            ));
        }

        for q in &self.data {
            let refs = q.references().ok_or_else(|| {
                validation(format!("cannot resolve references of node {:?}", q.ref_id))
            })?;
            for r in refs {
                if !seen.contains(r.as_str()) {
                    return Err(validation(format!(
                        "node {:?} references unknown node {:?}",
                        q.ref_id, r
                    )));
                }
            }
        }

        self.check_acyclic()
    }

    /// RefIDs the condition node depends on (itself included), in the order
    /// they appear in `data`.
    pub fn required_nodes(&self) -> Vec<&str> {
        let mut needed: HashSet<&str> = HashSet::new();
        let mut stack = vec![self.condition.as_str()];
        while let Some(id) = stack.pop() {
            if !needed.insert(id) {
                continue;
            }
            if let Some(node) = self.node(id) {
                for r in node.references().unwrap_or_default() {
                    if let Some(dep) = self.node(&r) {
                        stack.push(dep.ref_id.as_str());
                    }
                }
            }
        }
        self.data
            .iter()
            .map(|q| q.ref_id.as_str())
            .filter(|id| needed.contains(id))
            .collect()
    }

    fn check_acyclic(&self) -> CoreResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            cond: &'a Condition,
            id: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> CoreResult<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(validation(format!("cyclic reference through node {id:?}")));
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(node) = cond.node(id) {
                for r in node.references().unwrap_or_default() {
                    if let Some(dep) = cond.node(&r) {
                        visit(cond, dep.ref_id.as_str(), marks)?;
                    }
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for q in &self.data {
            visit(self, q.ref_id.as_str(), &mut marks)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AlertRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub org_id: i64,
    pub uid: String,
    pub title: String,
    /// RefID of the verdict node.
    pub condition: String,
    pub data: Vec<AlertQuery>,
    #[serde(with = "serde_secs")]
    pub interval: Duration,
    #[serde(rename = "for", with = "serde_secs", default)]
    pub for_duration: Duration,
    #[serde(default)]
    pub no_data_state: NoDataState,
    #[serde(default)]
    pub exec_err_state: ExecErrState,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
}

impl AlertRule {
    pub fn key(&self) -> RuleKey {
        RuleKey {
            org_id: self.org_id,
            uid: self.uid.clone(),
        }
    }

    pub fn eval_condition(&self) -> Condition {
        Condition {
            condition: self.condition.clone(),
            data: self.data.clone(),
        }
    }

    /// Validate the rule as submitted for evaluation: identity present,
    /// interval a positive multiple of `base_interval`, and a well-formed
    /// condition.
    pub fn validate(&self, base_interval: Duration) -> CoreResult<()> {
        if self.title.trim().is_empty() {
            return Err(validation("rule title is required"));
        }
        if self.uid.trim().is_empty() {
            return Err(validation(format!("rule {:?} has no UID", self.title)));
        }
        validate_interval(self.interval, base_interval)?;
        self.eval_condition().validate()
    }
}

/// A rule interval must be positive and a whole multiple of the base interval.
pub fn validate_interval(interval: Duration, base_interval: Duration) -> CoreResult<()> {
    if interval.is_zero() {
        return Err(validation("rule evaluation interval must be greater than zero"));
    }
    if !base_interval.is_zero() && interval.as_millis() % base_interval.as_millis() != 0 {
        return Err(validation(format!(
            "rule evaluation interval {}s must be a multiple of the base interval {}s",
            interval.as_secs_f64(),
            base_interval.as_secs_f64()
        )));
    }
    Ok(())
}
