use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::clock::Clock;
use crate::eval::{EvaluationResult, State};
use crate::labels::{Fingerprint, Labels, resolve_instance_labels};
use crate::model::{AlertRule, RuleKey};

use super::image::{ImageCapture, ImageRequest, NoopImageService};
use super::instance::{AlertInstance, StateTransition, reason};
use super::policy::{Outcome, exec_err_outcome, no_data_outcome};

// ---------------------------------------------------------------------------
// ManagerCfg
// ---------------------------------------------------------------------------

/// Collaborators and limits of a [`StateManager`].
#[derive(Clone)]
pub struct ManagerCfg {
    pub clock: Arc<dyn Clock>,
    pub images: Arc<dyn ImageCapture>,
    /// Upper bound on screenshots taken concurrently within one cycle.
    pub max_image_concurrency: usize,
    /// Consecutive evaluations a series may be missing before its instance
    /// is resolved and dropped.
    pub missing_series_evals_to_resolve: u32,
}

impl ManagerCfg {
    pub const DEFAULT_MISSING_SERIES_EVALS: u32 = 2;

    /// Configuration for throwaway managers: no screenshots, default limits.
    pub fn scratch(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            images: Arc::new(NoopImageService),
            max_image_concurrency: 1,
            missing_series_evals_to_resolve: Self::DEFAULT_MISSING_SERIES_EVALS,
        }
    }
}

// ---------------------------------------------------------------------------
// StateManager
// ---------------------------------------------------------------------------

/// Owns every alert instance and applies evaluation cycles to them.
///
/// Cycles are applied one at a time (`&mut self`); a manager is never shared
/// between rules running concurrently without external serialization.
pub struct StateManager {
    cfg: ManagerCfg,
    rules: HashMap<RuleKey, BTreeMap<Fingerprint, AlertInstance>>,
}

impl StateManager {
    pub fn new(cfg: ManagerCfg) -> Self {
        Self {
            cfg,
            rules: HashMap::new(),
        }
    }

    /// Instances of a rule ordered by fingerprint.
    pub fn get_states(&self, key: &RuleKey) -> Vec<&AlertInstance> {
        self.rules
            .get(key)
            .map(|t| t.values().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &RuleKey, fingerprint: Fingerprint) -> Option<&AlertInstance> {
        self.rules.get(key).and_then(|t| t.get(&fingerprint))
    }

    /// Apply one evaluation cycle of `rule`.
    ///
    /// Returns one transition per result, in result order, followed by the
    /// transitions of instances that went stale, ordered by fingerprint.
    /// A rule-wide `NoData`/`Error` result instead yields one transition per
    /// existing instance, ordered by fingerprint, and nothing goes stale.
    /// Screenshots for newly firing and resolved instances are taken after
    /// all transitions are computed.
    pub async fn process_eval_results(
        &mut self,
        evaluated_at: DateTime<Utc>,
        rule: &AlertRule,
        results: &[EvaluationResult],
        extra_labels: &Labels,
    ) -> Vec<StateTransition> {
        let key = rule.key();
        let mut transitions = Vec::with_capacity(results.len());
        let mut seen = HashSet::with_capacity(results.len());
        match self.rule_wide_targets(&key, results) {
            Some((result, targets)) => {
                for (fingerprint, labels) in targets {
                    let t =
                        self.update_instance(&key, fingerprint, labels, rule, result, evaluated_at);
                    seen.insert(fingerprint);
                    transitions.push(t);
                }
            }
            None => {
                for result in results {
                    let labels =
                        resolve_instance_labels(&rule.labels, &result.instance, extra_labels);
                    let fingerprint = labels.fingerprint();
                    let t =
                        self.update_instance(&key, fingerprint, labels, rule, result, evaluated_at);
                    seen.insert(fingerprint);
                    transitions.push(t);
                }
            }
        }
        transitions.extend(self.resolve_missing(&key, evaluated_at, &seen));

        self.capture_images(rule, &mut transitions).await;

        tracing::debug!(
            domain = "state",
            rule = %key,
            %evaluated_at,
            results = results.len(),
            transitions = transitions.len(),
            "cycle processed"
        );
        transitions
    }

    /// Resolve and forget every instance of a rule.
    pub fn delete_rule(&mut self, key: &RuleKey) -> Vec<StateTransition> {
        let now = self.cfg.clock.now();
        let Some(table) = self.rules.remove(key) else {
            return Vec::new();
        };
        table
            .into_values()
            .map(|previous| {
                let mut current = previous.clone();
                current.resolved = false;
                current.end(now);
                current.state_reason = reason::RULE_DELETED.to_string();
                StateTransition {
                    previous,
                    current,
                    at: now,
                }
            })
            .collect()
    }

    /// A single label-less `NoData`/`Error` result describes the whole rule
    /// (the datasource failed or returned nothing). When the rule already has
    /// instances, that result applies to each of them instead of creating a
    /// new label-less instance.
    fn rule_wide_targets<'r>(
        &self,
        key: &RuleKey,
        results: &'r [EvaluationResult],
    ) -> Option<(&'r EvaluationResult, Vec<(Fingerprint, Labels)>)> {
        let [result] = results else {
            return None;
        };
        if !result.instance.is_empty() || !matches!(result.state, State::NoData | State::Error) {
            return None;
        }
        let table = self.rules.get(key).filter(|t| !t.is_empty())?;
        let targets = table
            .iter()
            .map(|(fp, inst)| (*fp, inst.labels.clone()))
            .collect();
        Some((result, targets))
    }

    fn update_instance(
        &mut self,
        key: &RuleKey,
        fingerprint: Fingerprint,
        labels: Labels,
        rule: &AlertRule,
        result: &EvaluationResult,
        at: DateTime<Utc>,
    ) -> StateTransition {
        let instance = self
            .rules
            .entry(key.clone())
            .or_default()
            .entry(fingerprint)
            .or_insert_with(|| AlertInstance::new(key.clone(), labels, at));
        let previous = instance.clone();

        instance.annotations = rule.annotations.clone();
        instance.result_fingerprint = result.instance.fingerprint();
        instance.last_evaluation_time = at;
        instance.evaluation_duration = result.evaluation_duration;
        instance.values = result.numeric_values();
        instance.last_evaluation_string = result.evaluation_string.clone();
        instance.missed_evaluations = 0;
        instance.last_missed_at = None;
        instance.resolved = false;
        instance.stale = false;
        instance.error = None;

        let (outcome, why) = match result.state {
            State::Normal => (Outcome::Normal, None),
            State::Alerting | State::Pending => (Outcome::Firing, None),
            State::NoData => no_data_outcome(rule.no_data_state, previous.state),
            State::Error => {
                instance.error = result.error.clone();
                exec_err_outcome(rule.exec_err_state, previous.state)
            }
        };
        apply_outcome(instance, outcome, rule.for_duration, at);
        instance.state_reason = why.unwrap_or_default();

        StateTransition {
            previous,
            current: instance.clone(),
            at,
        }
    }

    /// Count a miss for every instance of `key` not in `seen`; resolve and
    /// drop those that reached the threshold.
    fn resolve_missing(
        &mut self,
        key: &RuleKey,
        at: DateTime<Utc>,
        seen: &HashSet<Fingerprint>,
    ) -> Vec<StateTransition> {
        let threshold = self.cfg.missing_series_evals_to_resolve.max(1);
        let Some(table) = self.rules.get_mut(key) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (fp, inst) in table.iter_mut() {
            if seen.contains(fp) {
                continue;
            }
            // A replay of an already counted timestamp is not a new miss.
            if at <= inst.last_evaluation_time || inst.last_missed_at.is_some_and(|t| at <= t) {
                continue;
            }
            inst.missed_evaluations += 1;
            inst.last_missed_at = Some(at);
            if inst.missed_evaluations < threshold {
                continue;
            }

            let previous = inst.clone();
            let mut current = inst.clone();
            current.resolved = false;
            current.end(at);
            current.state_reason = reason::MISSING_SERIES.to_string();
            current.last_evaluation_time = at;
            current.stale = true;
            out.push(StateTransition {
                previous,
                current,
                at,
            });
        }
        for t in &out {
            table.remove(&t.current.fingerprint);
        }
        if table.is_empty() {
            self.rules.remove(key);
        }
        out
    }

    async fn capture_images(&mut self, rule: &AlertRule, transitions: &mut [StateTransition]) {
        let wanted: Vec<usize> = transitions
            .iter()
            .enumerate()
            .filter(|(_, t)| needs_image(t))
            .map(|(i, _)| i)
            .collect();
        if wanted.is_empty() {
            return;
        }

        let permits = Arc::new(Semaphore::new(self.cfg.max_image_concurrency.max(1)));
        let mut set = JoinSet::new();
        for idx in wanted {
            let request = ImageRequest {
                rule_key: rule.key(),
                rule_title: rule.title.clone(),
                labels: transitions[idx].current.labels.clone(),
            };
            let images = Arc::clone(&self.cfg.images);
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (idx, images.capture(request).await)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (idx, captured) = match joined {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(domain = "state", rule = %rule.key(), error = %e, "image capture task failed");
                    continue;
                }
            };
            let current = &mut transitions[idx].current;
            match captured {
                Ok(Some(image)) => {
                    if let Some(inst) = self
                        .rules
                        .get_mut(&current.rule_key)
                        .and_then(|t| t.get_mut(&current.fingerprint))
                    {
                        inst.image = Some(image.clone());
                    }
                    current.image = Some(image);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        domain = "state",
                        rule = %rule.key(),
                        labels = %current.labels,
                        error = %e,
                        "failed to take an image"
                    );
                }
            }
        }
    }
}

fn needs_image(t: &StateTransition) -> bool {
    (t.current.state == State::Alerting && t.previous.state != State::Alerting)
        || t.current.resolved
}

/// Drive `instance` toward `outcome`, honouring the pending period for
/// firing outcomes.
fn apply_outcome(instance: &mut AlertInstance, outcome: Outcome, for_duration: Duration, at: DateTime<Utc>) {
    match outcome {
        Outcome::Normal => instance.end(at),
        Outcome::NoData => instance.enter(State::NoData, at),
        Outcome::Error => instance.enter(State::Error, at),
        Outcome::Firing => match instance.state {
            State::Alerting => instance.enter(State::Alerting, at),
            State::Pending => {
                let pending_for = at - instance.starts_at;
                let required = TimeDelta::from_std(for_duration).unwrap_or(TimeDelta::MAX);
                if pending_for >= required {
                    instance.enter(State::Alerting, at);
                }
            }
            State::Normal | State::NoData | State::Error => {
                if for_duration.is_zero() {
                    instance.enter(State::Alerting, at);
                } else {
                    instance.enter(State::Pending, at);
                }
            }
        },
    }
}
