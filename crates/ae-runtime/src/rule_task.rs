use std::sync::Arc;

use ae_core::clock::Clock;
use ae_core::eval::{ConditionEvaluator, EvaluationResult};
use ae_core::labels::Labels;
use ae_core::model::AlertRule;
use ae_core::state::{StateManager, StateTransition};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Cycles buffered between a rule task and its consumer before the task
/// waits.
pub const TRANSITION_CHANNEL_CAPACITY: usize = 16;

/// Evaluate `rule` every `rule.interval` until cancelled, feeding each
/// cycle through `manager` and sending the transitions to `tx`.
///
/// A failed execution is recorded as a single `Error` result so the rule's
/// execution-error policy decides what its instances become.
#[tracing::instrument(name = "rule", skip_all, fields(rule = %rule.key()))]
pub async fn run_rule(
    rule: AlertRule,
    extra_labels: Labels,
    evaluator: ConditionEvaluator,
    mut manager: StateManager,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<Vec<StateTransition>>,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(rule.interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let now = clock.now();
                ae_trace!(eval, at = %now, "evaluation tick");
                let results = match evaluator.evaluate(now).await {
                    Ok(results) => results,
                    Err(_) if cancel.is_cancelled() => break,
                    Err(e) => {
                        ae_warn!(eval, error = %e, "rule evaluation failed");
                        vec![EvaluationResult::from_error(e.to_string(), now)]
                    }
                };
                let transitions = manager
                    .process_eval_results(now, &rule, &results, &extra_labels)
                    .await;
                let changed = transitions.iter().filter(|t| t.changed()).count();
                if changed > 0 {
                    ae_debug!(state, changed, total = transitions.len(), "state transitions");
                }
                if tx.send(transitions).await.is_err() {
                    ae_debug!(sys, "transition receiver dropped, stopping rule task");
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    ae_info!(sys, "rule task stopped");
}
