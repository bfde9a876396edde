//! Request-level entry points: rule testing, raw query evaluation and
//! backtesting, with authorization and feature flags applied.

use std::sync::Arc;

use ae_config::{AlertingConfig, HumanDuration};
use ae_core::auth::RuleAuthorizer;
use ae_core::backtest::{BacktestEngine, BacktestLimits};
use ae_core::clock::Clock;
use ae_core::eval::{EvalContext, EvaluationResult, EvaluatorFactory, QueryBackend};
use ae_core::labels::{FOLDER_TITLE_LABEL, Labels, rule_extra_labels};
use ae_core::mapper::{PostableAlert, transitions_to_postable_alerts};
use ae_core::model::{
    AlertQuery, AlertRule, Condition, ExecErrState, Frame, NoDataState, QueryDataResponse,
    validate_interval,
};
use ae_core::optimize::{Optimization, add_optimization_notices, optimize_queries};
use ae_core::state::{ImageCapture, ManagerCfg, StateManager, StateTransition};
use chrono::{DateTime, Utc};
use orion_error::prelude::*;
use orion_error::StructError;
use orion_error::ErrorOweBase;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{RuntimeReason, RuntimeResult};
use crate::rule_task::{TRANSITION_CHANNEL_CAPACITY, run_rule};

/// Prefix of synthetic rule UIDs so backtest runs stand out in logs.
pub const BACKTEST_UID_PREFIX: &str = "backtesting-";

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Ad-hoc evaluation of a query graph.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalQueriesRequest {
    /// Defaults to the RefID of the last node when empty.
    #[serde(default)]
    pub condition: String,
    pub data: Vec<AlertQuery>,
    /// Defaults to the service clock.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

/// A rule definition replayed over `[from, to]`.
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestRequest {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub interval: HumanDuration,
    pub condition: String,
    pub data: Vec<AlertQuery>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    #[serde(rename = "for", default)]
    pub for_duration: HumanDuration,
    #[serde(default)]
    pub no_data_state: NoDataState,
}

// ---------------------------------------------------------------------------
// AlertingService
// ---------------------------------------------------------------------------

pub struct AlertingService {
    config: Arc<AlertingConfig>,
    evaluators: EvaluatorFactory,
    authz: Arc<dyn RuleAuthorizer>,
    clock: Arc<dyn Clock>,
}

impl AlertingService {
    pub fn new(
        config: Arc<AlertingConfig>,
        backend: Arc<dyn QueryBackend>,
        authz: Arc<dyn RuleAuthorizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let evaluators =
            EvaluatorFactory::new(backend).with_timeout(config.evaluation.timeout.as_duration());
        Self {
            config,
            evaluators,
            authz,
            clock,
        }
    }

    pub fn config(&self) -> &AlertingConfig {
        &self.config
    }

    /// Evaluate `rule` once, run the result through a throwaway state
    /// manager and return every resulting alert, firing or not.
    pub async fn test_rule(
        &self,
        ctx: EvalContext,
        mut rule: AlertRule,
        folder_title: &str,
    ) -> RuntimeResult<Vec<PostableAlert>> {
        rule.validate(self.config.evaluation.base_interval.as_duration())
            .err_conv()?;
        self.authz
            .authorize_rule_group(&ctx.principal, &[&rule])
            .await
            .owe(RuntimeReason::Unauthorized)?;

        if self.config.features.query_optimization {
            let (data, optimizations) = optimize_queries(&rule.condition, &rule.data);
            log_optimizations(&rule.uid, &optimizations);
            rule.data = data;
        }

        let evaluator = self
            .evaluators
            .create(ctx, rule.eval_condition())
            .err_conv()?;
        let now = self.clock.now();
        let results = evaluator.evaluate(now).await.err_conv()?;

        let include_folder = !self.config.reserved_labels.is_disabled(FOLDER_TITLE_LABEL);
        let extra = rule_extra_labels(
            &rule.title,
            &rule.uid,
            include_folder.then_some(folder_title),
        );
        let mut manager = StateManager::new(self.manager_cfg(None));
        let transitions = manager
            .process_eval_results(now, &rule, &results, &extra)
            .await;

        ae_debug!(eval, rule = %rule.key(), transitions = transitions.len(), "rule tested");
        Ok(transitions_to_postable_alerts(
            &transitions,
            self.config.external_url.as_ref(),
        ))
    }

    /// Execute a query graph and return the raw frames of every node.
    pub async fn eval_queries(
        &self,
        ctx: EvalContext,
        req: EvalQueriesRequest,
    ) -> RuntimeResult<QueryDataResponse> {
        self.authz
            .authorize_datasource_access(&ctx.principal, &req.data)
            .await
            .owe(RuntimeReason::Unauthorized)?;

        let mut condition = Condition {
            condition: req.condition,
            data: req.data,
        };
        if condition.condition.is_empty() {
            if let Some(last) = condition.data.last() {
                condition.condition = last.ref_id.clone();
            }
        }

        let mut optimizations = Vec::new();
        if self.config.features.query_optimization {
            let (data, applied) = optimize_queries(&condition.condition, &condition.data);
            log_optimizations(&condition.condition, &applied);
            condition.data = data;
            optimizations = applied;
        }

        let evaluator = self.evaluators.create(ctx, condition).err_conv()?;
        let now = req.now.unwrap_or_else(|| self.clock.now());
        let mut response = evaluator.evaluate_raw(now).await.err_conv()?;
        add_optimization_notices(&mut response, &optimizations);
        Ok(response)
    }

    /// Evaluate `condition` at `at` and return the per-series verdicts.
    pub async fn evaluate_once(
        &self,
        ctx: EvalContext,
        condition: Condition,
        at: DateTime<Utc>,
    ) -> RuntimeResult<Vec<EvaluationResult>> {
        let evaluator = self.evaluators.create(ctx, condition).err_conv()?;
        evaluator.evaluate(at).await.err_conv()
    }

    /// Replay a rule definition over a time range.
    pub async fn backtest(&self, ctx: EvalContext, req: BacktestRequest) -> RuntimeResult<Frame> {
        if !self.config.backtesting.enabled {
            return Err(StructError::from(RuntimeReason::FeatureDisabled)
                .with_detail("backtesting is not enabled"));
        }
        let interval = req.interval.as_duration();
        validate_interval(interval, self.config.evaluation.base_interval.as_duration())
            .err_conv()?;

        let rule = AlertRule {
            org_id: ctx.principal.org_id,
            uid: format!("{BACKTEST_UID_PREFIX}{}", short_uid()),
            title: req.title,
            condition: req.condition,
            data: req.data,
            interval,
            for_duration: req.for_duration.as_duration(),
            no_data_state: req.no_data_state,
            exec_err_state: ExecErrState::default(),
            labels: req.labels,
            annotations: req.annotations,
        };
        self.authz
            .authorize_rule_group(&ctx.principal, &[&rule])
            .await
            .owe(RuntimeReason::Unauthorized)?;

        ae_info!(eval, rule = %rule.key(), from = %req.from, to = %req.to, "backtest started");
        let engine = BacktestEngine::new(
            self.evaluators.clone(),
            BacktestLimits::from(&self.config.backtesting),
        )
        .with_missing_series_evals(self.config.evaluation.missing_series_evals_to_resolve);
        engine.test(ctx, &rule, req.from, req.to).await.err_conv()
    }

    /// Start the periodic evaluation of `rule`. Transitions of every cycle
    /// arrive on the returned receiver until `ctx.cancel` fires.
    pub fn spawn_rule(
        &self,
        ctx: EvalContext,
        rule: AlertRule,
        folder_title: Option<&str>,
        images: Arc<dyn ImageCapture>,
    ) -> RuntimeResult<(JoinHandle<()>, mpsc::Receiver<Vec<StateTransition>>)> {
        rule.validate(self.config.evaluation.base_interval.as_duration())
            .err_conv()?;
        let cancel = ctx.cancel.clone();
        let evaluator = self
            .evaluators
            .create(ctx, rule.eval_condition())
            .err_conv()?;
        let folder = folder_title
            .filter(|_| !self.config.reserved_labels.is_disabled(FOLDER_TITLE_LABEL));
        let extra = rule_extra_labels(&rule.title, &rule.uid, folder);
        let manager = StateManager::new(self.manager_cfg(Some(images)));

        let (tx, rx) = mpsc::channel(TRANSITION_CHANNEL_CAPACITY);
        ae_info!(sys, rule = %rule.key(), interval = ?rule.interval, "rule task started");
        let handle = tokio::spawn(run_rule(
            rule,
            extra,
            evaluator,
            manager,
            Arc::clone(&self.clock),
            tx,
            cancel,
        ));
        Ok((handle, rx))
    }

    fn manager_cfg(&self, images: Option<Arc<dyn ImageCapture>>) -> ManagerCfg {
        let mut cfg = ManagerCfg::scratch(Arc::clone(&self.clock));
        cfg.missing_series_evals_to_resolve =
            self.config.evaluation.missing_series_evals_to_resolve;
        if let Some(images) = images {
            cfg.images = images;
            cfg.max_image_concurrency = self.config.evaluation.max_image_concurrency;
        }
        cfg
    }
}

fn log_optimizations(subject: &str, optimizations: &[Optimization]) {
    for opt in optimizations {
        ae_debug!(eval, subject, ref_id = %opt.ref_id, "range query rewritten to instant");
    }
}

/// Nine alphanumeric characters.
fn short_uid() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests;
