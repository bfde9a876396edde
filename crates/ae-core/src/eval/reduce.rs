use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::labels::Labels;
use crate::model::{Condition, FieldValues, Frame, QueryDataResponse};

use super::result::{EvaluationResult, NumberCapture, State, evaluation_string};

/// Turn the raw output of a condition graph into one result per label set.
pub(super) fn condition_results(
    condition: &Condition,
    response: &QueryDataResponse,
    at: DateTime<Utc>,
    duration: Duration,
) -> Vec<EvaluationResult> {
    let finish = |mut r: EvaluationResult| {
        r.evaluation_duration = duration;
        r
    };

    let required = condition.required_nodes();
    for id in &required {
        if let Some(err) = response.get(id).and_then(|r| r.error.as_ref()) {
            return vec![finish(EvaluationResult::from_error(
                format!("failed to execute query {id}: {err}"),
                at,
            ))];
        }
    }

    let frames = response
        .get(&condition.condition)
        .map(|r| r.frames.as_slice())
        .unwrap_or_default();
    if frames.is_empty() {
        return vec![finish(EvaluationResult::new(Labels::new(), State::NoData, at))];
    }

    let captures = captures(&required, &condition.condition, response);
    let mut seen = HashSet::with_capacity(frames.len());
    let mut results = Vec::with_capacity(frames.len());
    for frame in frames {
        let (labels, verdict) = classify(&condition.condition, frame);
        if !seen.insert(labels.fingerprint()) {
            let mut dup = EvaluationResult::from_error(
                format!(
                    "frame cannot uniquely be identified by its labels: has duplicate results with labels {labels}"
                ),
                at,
            );
            dup.instance = labels;
            results.push(finish(dup));
            continue;
        }

        let result = match verdict {
            Ok((state, value)) => {
                let mut r = EvaluationResult::new(labels.clone(), state, at);
                let mut values: BTreeMap<String, NumberCapture> = captures
                    .iter()
                    .filter(|c| c.labels.is_subset_of(&labels))
                    .fold(BTreeMap::new(), |mut acc, c| {
                        acc.entry(c.var.clone()).or_insert_with(|| c.clone());
                        acc
                    });
                values.insert(
                    condition.condition.clone(),
                    NumberCapture {
                        var: condition.condition.clone(),
                        labels: labels.clone(),
                        value,
                    },
                );
                r.evaluation_string = evaluation_string(&values);
                r.values = values;
                r
            }
            Err(message) => {
                let mut r = EvaluationResult::from_error(message, at);
                r.instance = labels;
                r
            }
        };
        results.push(finish(result));
    }
    results
}

/// Labels and verdict of one condition frame. Errors describe why the frame
/// cannot be alerted on.
fn classify(ref_id: &str, frame: &Frame) -> (Labels, Result<(State, Option<f64>), String>) {
    let labels = match frame.fields.as_slice() {
        [only] => only.labels.clone(),
        _ => Labels::new(),
    };

    let Some(rows) = frame.row_len() else {
        return (
            labels,
            Err(format!("frame of {ref_id} has fields of different lengths")),
        );
    };
    if frame.has_time_field() {
        return (
            labels,
            Err(format!(
                "invalid format of evaluation results for the alert definition {ref_id}: looks like time series data, only reduced data can be alerted on."
            )),
        );
    }
    if rows == 0 {
        return (labels, Ok((State::NoData, None)));
    }
    if rows > 1 {
        return (
            labels,
            Err(format!(
                "invalid format of evaluation results for the alert definition {ref_id}: unexpected row length: {rows} instead of 0 or 1"
            )),
        );
    }
    if frame.fields.len() > 1 {
        return (
            labels,
            Err(format!(
                "invalid format of evaluation results for the alert definition {ref_id}: unexpected field length: {} instead of 1",
                frame.fields.len()
            )),
        );
    }

    let field = &frame.fields[0];
    let verdict = match &field.values {
        FieldValues::Number(v) => match v[0] {
            None => Ok((State::NoData, None)),
            Some(n) if n == 0.0 => Ok((State::Normal, Some(n))),
            Some(n) => Ok((State::Alerting, Some(n))),
        },
        FieldValues::Bool(v) => match v[0] {
            None => Ok((State::NoData, None)),
            Some(true) => Ok((State::Alerting, Some(1.0))),
            Some(false) => Ok((State::Normal, Some(0.0))),
        },
        other => Err(format!(
            "invalid format of evaluation results for the alert definition {ref_id}: invalid field type: {}",
            other.type_name()
        )),
    };
    (labels, verdict)
}

/// Single numbers produced by the non-condition nodes the condition depends on.
fn captures(required: &[&str], condition: &str, response: &QueryDataResponse) -> Vec<NumberCapture> {
    let mut out = Vec::new();
    for id in required.iter().filter(|id| **id != condition) {
        let Some(resp) = response.get(id) else {
            continue;
        };
        for frame in &resp.frames {
            let [field] = frame.fields.as_slice() else {
                continue;
            };
            let value = match &field.values {
                FieldValues::Number(v) if v.len() == 1 => v[0],
                FieldValues::Bool(v) if v.len() == 1 => v[0].map(|b| if b { 1.0 } else { 0.0 }),
                _ => continue,
            };
            out.push(NumberCapture {
                var: (*id).to_string(),
                labels: field.labels.clone(),
                value,
            });
        }
    }
    out
}
