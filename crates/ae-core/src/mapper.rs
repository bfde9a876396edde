//! Conversion of alert instances into the payload posted to notifiers.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::eval::State;
use crate::labels::{ALERT_NAME_LABEL, Labels, RULE_NAME_LABEL};
use crate::state::{AlertInstance, StateTransition};

/// How often a still-firing alert is re-sent.
pub const RESEND_DELAY: Duration = Duration::from_secs(60);
/// Open alerts expire this many resend periods after their last evaluation
/// unless refreshed.
pub const ALERT_HORIZON_RESENDS: u32 = 3;

pub const NO_DATA_ALERT_NAME: &str = "DatasourceNoData";
pub const ERROR_ALERT_NAME: &str = "DatasourceError";

pub const VALUES_ANNOTATION: &str = "__values__";
pub const VALUE_STRING_ANNOTATION: &str = "__value_string__";
pub const STATE_REASON_ANNOTATION: &str = "__state_reason__";
pub const ORG_ID_ANNOTATION: &str = "__orgId__";
pub const IMAGE_URL_ANNOTATION: &str = "__alertImageURL__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableAlert {
    pub labels: Labels,
    pub annotations: Labels,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
}

pub fn state_to_postable_alert(instance: &AlertInstance, external_url: Option<&Url>) -> PostableAlert {
    PostableAlert {
        labels: alert_labels(instance),
        annotations: alert_annotations(instance),
        starts_at: instance.starts_at,
        ends_at: ends_at(instance),
        generator_url: generator_url(external_url, &instance.rule_key.uid),
    }
}

/// Every transition's current snapshot, in order. Nothing is filtered.
pub fn transitions_to_postable_alerts(
    transitions: &[StateTransition],
    external_url: Option<&Url>,
) -> Vec<PostableAlert> {
    transitions
        .iter()
        .map(|t| state_to_postable_alert(&t.current, external_url))
        .collect()
}

fn alert_labels(instance: &AlertInstance) -> Labels {
    let mut labels = instance.labels.clone();
    let renamed = match instance.state {
        State::NoData => NO_DATA_ALERT_NAME,
        State::Error => ERROR_ALERT_NAME,
        _ => return labels,
    };
    if let Some(original) = labels.insert(ALERT_NAME_LABEL, renamed) {
        labels.insert(RULE_NAME_LABEL, original);
    }
    labels
}

fn alert_annotations(instance: &AlertInstance) -> Labels {
    let mut annotations = instance.annotations.clone();
    annotations.insert(ORG_ID_ANNOTATION, instance.rule_key.org_id.to_string());
    if !instance.values.is_empty() {
        if let Ok(json) = serde_json::to_string(&instance.values) {
            annotations.insert(VALUES_ANNOTATION, json);
        }
    }
    if !instance.last_evaluation_string.is_empty() {
        annotations.insert(VALUE_STRING_ANNOTATION, instance.last_evaluation_string.clone());
    }
    if !instance.state_reason.is_empty() {
        annotations.insert(STATE_REASON_ANNOTATION, instance.state_reason.clone());
    }
    if let Some(url) = instance.image.as_ref().and_then(|i| i.url.as_ref()) {
        annotations.insert(IMAGE_URL_ANNOTATION, url.clone());
    }
    annotations
}

fn ends_at(instance: &AlertInstance) -> DateTime<Utc> {
    if let Some(ends) = instance.ends_at {
        return ends;
    }
    if instance.state.is_active() {
        let horizon = TimeDelta::from_std(RESEND_DELAY * ALERT_HORIZON_RESENDS).unwrap_or(TimeDelta::zero());
        return instance.last_evaluation_time + horizon;
    }
    instance.last_evaluation_time
}

/// `<external_url>/alerting/grafana/<uid>/view`, or empty without a base URL.
fn generator_url(external_url: Option<&Url>, uid: &str) -> String {
    let Some(base) = external_url else {
        return String::new();
    };
    let mut url = base.clone();
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments
                .pop_if_empty()
                .extend(["alerting", "grafana", uid, "view"]);
        }
        Err(()) => return String::new(),
    }
    url.to_string()
}
