use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::serde_secs;

// ---------------------------------------------------------------------------
// AlertQuery
// ---------------------------------------------------------------------------

/// One named node of a condition graph: either a datasource query or an
/// expression over other nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertQuery {
    pub ref_id: String,
    #[serde(default)]
    pub relative_time_range: RelativeTimeRange,
    pub model: QueryModel,
}

impl AlertQuery {
    /// Datasource queries produce data; expressions only transform it.
    pub fn is_data_query(&self) -> bool {
        matches!(self.model, QueryModel::Datasource(_))
    }

    /// RefIDs this node reads from.
    ///
    /// `None` means the references could not be determined (for example a
    /// malformed math expression); callers must not guess in that case.
    pub fn references(&self) -> Option<Vec<String>> {
        match &self.model {
            QueryModel::Datasource(_) => Some(Vec::new()),
            QueryModel::Reduce { expression, .. } | QueryModel::Threshold { expression, .. } => {
                single_reference(expression).map(|r| vec![r])
            }
            QueryModel::Math { expression } => math_references(expression),
        }
    }
}

/// Window of time a query covers, expressed as offsets before "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeTimeRange {
    #[serde(with = "serde_secs")]
    pub from: Duration,
    #[serde(with = "serde_secs", default)]
    pub to: Duration,
}

impl Default for RelativeTimeRange {
    fn default() -> Self {
        Self {
            from: Duration::from_secs(600),
            to: Duration::ZERO,
        }
    }
}

impl RelativeTimeRange {
    /// Resolve against `now` into an absolute `[start, end]` pair.
    pub fn absolute(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = TimeDelta::from_std(self.from).unwrap_or(TimeDelta::MAX);
        let to = TimeDelta::from_std(self.to).unwrap_or(TimeDelta::MAX);
        let start = now.checked_sub_signed(from).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = now.checked_sub_signed(to).unwrap_or(DateTime::<Utc>::MIN_UTC);
        (start, end)
    }
}

// ---------------------------------------------------------------------------
// QueryModel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryModel {
    /// A query sent to a datasource.
    Datasource(DatasourceQuery),
    /// Collapse each series of `expression` to a single number.
    Reduce { expression: String, reducer: Reducer },
    /// Arithmetic over `$RefID` variables.
    Math { expression: String },
    /// Compare each number of `expression` against fixed bounds; yields 1 or 0.
    Threshold {
        expression: String,
        evaluator: ThresholdEvaluator,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceQuery {
    pub datasource_uid: String,
    /// Plugin type, e.g. `"prometheus"`.
    pub datasource_type: String,
    pub expr: String,
    /// Request every sample in the time range.
    #[serde(default)]
    pub range: bool,
    /// Request only the sample at the end of the time range.
    #[serde(default)]
    pub instant: bool,
}

impl DatasourceQuery {
    pub fn is_range(&self) -> bool {
        self.range && !self.instant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Last,
    Mean,
    Min,
    Max,
    Sum,
    Count,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEvaluator {
    #[serde(rename = "type")]
    pub kind: ThresholdKind,
    pub params: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    Gt,
    Lt,
    WithinRange,
    OutsideRange,
}

impl ThresholdEvaluator {
    /// `None` when `params` does not hold enough bounds for `kind`.
    pub fn matches(&self, value: f64) -> Option<bool> {
        match (self.kind, self.params.as_slice()) {
            (ThresholdKind::Gt, [t, ..]) => Some(value > *t),
            (ThresholdKind::Lt, [t, ..]) => Some(value < *t),
            (ThresholdKind::WithinRange, [lo, hi, ..]) => Some(value > *lo && value < *hi),
            (ThresholdKind::OutsideRange, [lo, hi, ..]) => Some(value < *lo || value > *hi),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Reference parsing
// ---------------------------------------------------------------------------

fn is_ref_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `"A"`, `"$A"` or `"${A}"`.
fn single_reference(expression: &str) -> Option<String> {
    let s = expression.trim();
    let s = s.strip_prefix('$').unwrap_or(s);
    let s = s
        .strip_prefix('{')
        .and_then(|inner| inner.strip_suffix('}'))
        .unwrap_or(s);
    if s.is_empty() || !s.chars().all(is_ref_char) {
        return None;
    }
    Some(s.to_string())
}

/// Every `$Name` / `${Name}` variable in a math expression, deduplicated in
/// order of first appearance.
fn math_references(expression: &str) -> Option<Vec<String>> {
    let mut refs: Vec<String> = Vec::new();
    let mut rest = expression;
    while let Some(pos) = rest.find('$') {
        rest = &rest[pos + 1..];
        let name = if let Some(inner) = rest.strip_prefix('{') {
            let end = inner.find('}')?;
            let name = &inner[..end];
            rest = &inner[end + 1..];
            name
        } else {
            let end = rest.find(|c: char| !is_ref_char(c)).unwrap_or(rest.len());
            let name = &rest[..end];
            rest = &rest[end..];
            name
        };
        if name.is_empty() || !name.chars().all(is_ref_char) {
            return None;
        }
        if !refs.iter().any(|r| r == name) {
            refs.push(name.to_string());
        }
    }
    Some(refs)
}
