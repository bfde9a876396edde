//! Offline replay of a rule over a historical time range.


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ae_config::BacktestingConfig;
use chrono::{DateTime, TimeDelta, Utc};
use orion_error::StructError;
use orion_error::prelude::*;

use crate::clock::ManualClock;
use crate::error::{CoreReason, CoreResult, validation};
use crate::eval::{EvalContext, EvaluatorFactory};
use crate::labels::{Fingerprint, Labels};
use crate::model::{AlertRule, Field, FieldValues, Frame};
use crate::state::{ManagerCfg, StateManager, StateTransition};

pub const RESULT_FRAME_NAME: &str = "Backtesting results";
pub const TIME_FIELD_NAME: &str = "Time";

/// Bounds enforced before a backtest executes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacktestLimits {
    pub min_interval: Duration,
    pub max_steps: usize,
}

impl From<&BacktestingConfig> for BacktestLimits {
    fn from(cfg: &BacktestingConfig) -> Self {
        Self {
            min_interval: cfg.min_interval.as_duration(),
            max_steps: cfg.max_steps,
        }
    }
}

/// Transitions produced at one replayed timestamp.
#[derive(Debug, Clone)]
pub struct BacktestStep {
    pub at: DateTime<Utc>,
    pub transitions: Vec<StateTransition>,
}

pub struct BacktestEngine {
    evaluators: EvaluatorFactory,
    limits: BacktestLimits,
    missing_series_evals_to_resolve: u32,
}

impl BacktestEngine {
    pub fn new(evaluators: EvaluatorFactory, limits: BacktestLimits) -> Self {
        Self {
            evaluators,
            limits,
            missing_series_evals_to_resolve: ManagerCfg::DEFAULT_MISSING_SERIES_EVALS,
        }
    }

    pub fn with_missing_series_evals(mut self, evals: u32) -> Self {
        self.missing_series_evals_to_resolve = evals;
        self
    }

    /// Replay `rule` at `from, from + interval, ...` up to `to` and return
    /// a wide frame: a `Time` field followed by one state field and one
    /// value field per instance, in order of first appearance.
    pub async fn test(
        &self,
        ctx: EvalContext,
        rule: &AlertRule,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Frame> {
        let steps = self.replay(ctx, rule, from, to).await?;
        Ok(results_frame(&rule.condition, &steps))
    }

    /// Replay `rule` and return every step's transitions.
    ///
    /// All bounds are checked up front; nothing is executed for a rejected
    /// range. Any execution failure aborts the whole replay.
    #[tracing::instrument(name = "backtest", skip_all, fields(rule = %rule.key(), %from, %to))]
    pub async fn replay(
        &self,
        ctx: EvalContext,
        rule: &AlertRule,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Vec<BacktestStep>> {
        let (count, step) = self.step_plan(rule.interval, from, to)?;
        let evaluator = self.evaluators.create(ctx, rule.eval_condition())?;

        let clock = Arc::new(ManualClock::new(from));
        let mut cfg = ManagerCfg::scratch(clock.clone());
        cfg.missing_series_evals_to_resolve = self.missing_series_evals_to_resolve;
        let mut manager = StateManager::new(cfg);
        // Rule labels are merged by the manager; identity labels would make
        // runs of the same rule differ.
        let extra = Labels::new();

        let mut steps = Vec::with_capacity(count);
        let mut at = from;
        for i in 0..count {
            if i > 0 {
                at = at.checked_add_signed(step).ok_or_else(|| {
                    validation(format!("evaluation time after {at} is out of range"))
                })?;
            }
            clock.set(at);
            let results = evaluator.evaluate(at).await.map_err(|e| {
                StructError::from(CoreReason::Execution)
                    .with_detail(format!("rule {} failed at {at}: {e}", rule.key()))
            })?;
            let transitions = manager
                .process_eval_results(at, rule, &results, &extra)
                .await;
            steps.push(BacktestStep { at, transitions });
        }

        tracing::debug!(domain = "eval", steps = steps.len(), "backtest finished");
        Ok(steps)
    }

    /// Number of evaluations and the distance between them.
    fn step_plan(
        &self,
        interval: Duration,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<(usize, TimeDelta)> {
        if from > to {
            return Err(validation(format!("from {from} cannot be after to {to}")));
        }
        if interval.is_zero() {
            return Err(validation("interval must be greater than zero"));
        }
        if interval < self.limits.min_interval {
            return Err(validation(format!(
                "interval {}s is below the minimum of {}s",
                interval.as_secs_f64(),
                self.limits.min_interval.as_secs_f64()
            )));
        }
        let step = TimeDelta::from_std(interval).map_err(|_| {
            validation(format!("interval {}s is too large", interval.as_secs_f64()))
        })?;
        let span = (to - from).to_std().unwrap_or_default();
        let steps = span.as_millis() / interval.as_millis() + 1;
        if steps > self.limits.max_steps as u128 {
            return Err(StructError::from(CoreReason::ResourceLimit).with_detail(format!(
                "backtest needs {steps} evaluations, the limit is {}",
                self.limits.max_steps
            )));
        }
        Ok((steps as usize, step))
    }
}

// ---------------------------------------------------------------------------
// Result frame
// ---------------------------------------------------------------------------

struct Column {
    fingerprint: Fingerprint,
    labels: Labels,
    states: Vec<Option<String>>,
    values: Vec<Option<f64>>,
}

fn results_frame(condition: &str, steps: &[BacktestStep]) -> Frame {
    let mut columns: Vec<Column> = Vec::new();
    let mut index: HashMap<Fingerprint, usize> = HashMap::new();

    for (row, step) in steps.iter().enumerate() {
        for t in &step.transitions {
            let inst = &t.current;
            let col = *index.entry(inst.fingerprint).or_insert_with(|| {
                columns.push(Column {
                    fingerprint: inst.fingerprint,
                    labels: inst.labels.clone(),
                    states: vec![None; steps.len()],
                    values: vec![None; steps.len()],
                });
                columns.len() - 1
            });
            columns[col].states[row] = Some(inst.display_state());
            columns[col].values[row] = inst.values.get(condition).copied();
        }
    }

    let mut fields = Vec::with_capacity(1 + columns.len() * 2);
    fields.push(Field::new(
        TIME_FIELD_NAME,
        Labels::new(),
        FieldValues::Time(steps.iter().map(|s| s.at).collect()),
    ));
    for col in columns {
        let name = col.fingerprint.to_string();
        fields.push(Field::new(
            name.clone(),
            col.labels.clone(),
            FieldValues::String(col.states),
        ));
        fields.push(Field::new(
            format!("{name}_value"),
            col.labels,
            FieldValues::Number(col.values),
        ));
    }
    Frame::new(RESULT_FRAME_NAME, fields)
}
