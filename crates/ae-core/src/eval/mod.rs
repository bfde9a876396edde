//! Condition evaluation: run a query graph through a [`QueryBackend`] and
//! reduce the condition node's frames to per-series verdicts.

mod backend;
mod reduce;
mod result;


use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use orion_error::ErrorOweBase;
use tokio_util::sync::CancellationToken;

use crate::auth::Principal;
use crate::error::{CoreReason, CoreResult, execution};
use crate::model::{Condition, QueryDataResponse};

pub use backend::QueryBackend;
pub use result::{EvaluationResult, NumberCapture, State};

// ---------------------------------------------------------------------------
// EvalContext
// ---------------------------------------------------------------------------

/// Who is evaluating, and the token that aborts the evaluation.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub principal: Principal,
    pub cancel: CancellationToken,
}

impl EvalContext {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

// ---------------------------------------------------------------------------
// EvaluatorFactory
// ---------------------------------------------------------------------------

/// Builds [`ConditionEvaluator`]s bound to one backend.
#[derive(Clone)]
pub struct EvaluatorFactory {
    backend: Arc<dyn QueryBackend>,
    timeout: Option<Duration>,
}

impl EvaluatorFactory {
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            backend,
            timeout: None,
        }
    }

    /// Upper bound on a single backend execution. Zero disables the bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Validate `condition` and bind it to `ctx`. Nothing is executed here.
    pub fn create(&self, ctx: EvalContext, condition: Condition) -> CoreResult<ConditionEvaluator> {
        condition.validate()?;
        Ok(ConditionEvaluator {
            ctx,
            condition,
            backend: Arc::clone(&self.backend),
            timeout: self.timeout,
        })
    }
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

pub struct ConditionEvaluator {
    ctx: EvalContext,
    condition: Condition,
    backend: Arc<dyn QueryBackend>,
    timeout: Option<Duration>,
}

impl ConditionEvaluator {
    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// Execute the graph at `now` and return every node's output untouched.
    #[tracing::instrument(name = "evaluate", skip(self), fields(condition = %self.condition.condition))]
    pub async fn evaluate_raw(&self, now: DateTime<Utc>) -> CoreResult<QueryDataResponse> {
        let cancelled = || {
            execution(format!(
                "evaluation of condition {} at {now} cancelled",
                self.condition.condition
            ))
        };
        if self.ctx.cancel.is_cancelled() {
            return Err(cancelled());
        }

        let run = async {
            let exec = self.backend.execute(&self.ctx, &self.condition.data, now);
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, exec).await {
                    Ok(res) => res.owe(CoreReason::Execution),
                    Err(_) => Err(execution(format!(
                        "query execution of condition {} at {now} timed out after {}s",
                        self.condition.condition,
                        limit.as_secs_f64()
                    ))),
                },
                None => exec.await.owe(CoreReason::Execution),
            }
        };

        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => Err(cancelled()),
            res = run => res,
        }
    }

    /// Execute the graph at `now` and reduce the condition node to results.
    ///
    /// Failures of individual nodes become a single `Error` result; only a
    /// failure of the execution as a whole is returned as `Err`.
    pub async fn evaluate(&self, now: DateTime<Utc>) -> CoreResult<Vec<EvaluationResult>> {
        let started = Instant::now();
        let response = self.evaluate_raw(now).await?;
        let results = reduce::condition_results(&self.condition, &response, now, started.elapsed());
        tracing::debug!(
            domain = "eval",
            condition = %self.condition.condition,
            %now,
            results = results.len(),
            "condition evaluated"
        );
        Ok(results)
    }
}
