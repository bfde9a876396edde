use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::labels::Labels;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Columnar table returned by the query backend for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ref_id: String,
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
}

impl Frame {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            ref_id: String::new(),
            fields,
            notices: Vec::new(),
        }
    }

    /// Number of rows, or `None` when fields disagree on their length.
    pub fn row_len(&self) -> Option<usize> {
        let mut lens = self.fields.iter().map(|f| f.values.len());
        let first = lens.next().unwrap_or(0);
        lens.all(|l| l == first).then_some(first)
    }

    pub fn has_time_field(&self) -> bool {
        self.fields
            .iter()
            .any(|f| matches!(f.values, FieldValues::Time(_)))
    }

    pub fn append_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    pub values: FieldValues,
}

impl Field {
    pub fn new(name: impl Into<String>, labels: Labels, values: FieldValues) -> Self {
        Self {
            name: name.into(),
            labels,
            values,
        }
    }

    /// Single numeric field with one value, as produced by reductions.
    pub fn number(name: impl Into<String>, labels: Labels, value: Option<f64>) -> Self {
        Self::new(name, labels, FieldValues::Number(vec![value]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum FieldValues {
    Time(Vec<DateTime<Utc>>),
    Number(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    String(Vec<Option<String>>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Time(v) => v.len(),
            Self::Number(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Time(_) => "time",
            Self::Number(_) => "number",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: NoticeSeverity,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeSeverity {
    Info,
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// QueryDataResponse
// ---------------------------------------------------------------------------

/// Per-RefID output of one backend execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDataResponse {
    pub responses: BTreeMap<String, DataResponse>,
}

impl QueryDataResponse {
    pub fn insert(&mut self, ref_id: impl Into<String>, response: DataResponse) {
        self.responses.insert(ref_id.into(), response);
    }

    pub fn get(&self, ref_id: &str) -> Option<&DataResponse> {
        self.responses.get(ref_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    #[serde(default)]
    pub frames: Vec<Frame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DataResponse {
    pub fn frames(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            frames: Vec::new(),
            error: Some(message.into()),
        }
    }
}
