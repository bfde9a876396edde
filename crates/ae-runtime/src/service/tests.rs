use std::sync::Arc;
use std::time::Duration;

use ae_core::auth::{AllowAll, Principal};
use ae_core::clock::ManualClock;
use ae_core::error::CoreReason;
use ae_core::labels::{ALERT_NAME_LABEL, FOLDER_TITLE_LABEL, RULE_UID_LABEL};
use ae_core::model::{FieldValues, RelativeTimeRange, Reducer};
use ae_core::optimize::OPTIMIZATION_WARNING;
use ae_core::state::NoopImageService;
use async_trait::async_trait;

use super::*;
use crate::replay::{ReplayBackend, ReplayFixture};

// -- helpers ---------------------------------------------------------------

const FIXTURE: &str = r#"{
    "series": [
        {"datasource_uid": "prom", "expr": "cpu", "labels": {"host": "a"},
         "points": [[0, 1.0], [60, 7.0], [120, 9.0], [180, 9.0]]},
        {"datasource_uid": "prom", "expr": "cpu", "labels": {"host": "b"},
         "points": [[0, 1.0], [60, 1.0], [120, 2.0], [180, 2.0]]}
    ]
}"#;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

fn ctx() -> EvalContext {
    EvalContext::new(Principal::new(1, "tester"))
}

struct DenyAll;

#[async_trait]
impl RuleAuthorizer for DenyAll {
    async fn authorize_rule_group(&self, _: &Principal, _: &[&AlertRule]) -> anyhow::Result<()> {
        anyhow::bail!("no access to folder")
    }

    async fn authorize_datasource_access(
        &self,
        _: &Principal,
        _: &[AlertQuery],
    ) -> anyhow::Result<()> {
        anyhow::bail!("no access to datasource")
    }
}

fn service_with(toml: &str, authz: Arc<dyn RuleAuthorizer>, now: i64) -> AlertingService {
    let config: AlertingConfig = toml.parse().unwrap();
    let fixture: ReplayFixture = serde_json::from_str(FIXTURE).unwrap();
    AlertingService::new(
        Arc::new(config),
        Arc::new(ReplayBackend::new(fixture)),
        authz,
        Arc::new(ManualClock::new(at(now))),
    )
}

fn service(toml: &str) -> AlertingService {
    service_with(toml, Arc::new(AllowAll), 120)
}

fn queries() -> Vec<AlertQuery> {
    serde_json::from_value(serde_json::json!([
        {
            "ref_id": "A",
            "relative_time_range": {"from": 120, "to": 0},
            "model": {"type": "datasource", "datasource_uid": "prom",
                      "datasource_type": "prometheus", "expr": "cpu", "range": true}
        },
        {"ref_id": "B", "model": {"type": "reduce", "expression": "A", "reducer": "last"}},
        {"ref_id": "C", "model": {"type": "threshold", "expression": "$B",
                                  "evaluator": {"type": "gt", "params": [5.0]}}}
    ]))
    .unwrap()
}

fn rule() -> AlertRule {
    AlertRule {
        org_id: 1,
        uid: "cpu-rule".into(),
        title: "High CPU".into(),
        condition: "C".into(),
        data: queries(),
        interval: Duration::from_secs(60),
        for_duration: Duration::ZERO,
        no_data_state: NoDataState::default(),
        exec_err_state: ExecErrState::default(),
        labels: Labels::from([("team", "core")]),
        annotations: Labels::from([("summary", "cpu is high")]),
    }
}

fn backtest_request(from: i64, to: i64) -> BacktestRequest {
    BacktestRequest {
        from: at(from),
        to: at(to),
        interval: "1m".parse().unwrap(),
        condition: "C".into(),
        data: queries(),
        title: "High CPU".into(),
        labels: Labels::new(),
        annotations: Labels::new(),
        for_duration: HumanDuration::ZERO,
        no_data_state: NoDataState::default(),
    }
}

// -- test_rule ---------------------------------------------------------------

#[tokio::test]
async fn test_rule_returns_every_instance() {
    let svc = service("external_url = \"https://alerts.example.com/\"\n");
    let alerts = svc.test_rule(ctx(), rule(), "infra").await.unwrap();
    assert_eq!(alerts.len(), 2);

    let firing = alerts
        .iter()
        .find(|a| a.labels.get("host") == Some("a"))
        .unwrap();
    assert_eq!(firing.labels.get(ALERT_NAME_LABEL), Some("High CPU"));
    assert_eq!(firing.labels.get(RULE_UID_LABEL), Some("cpu-rule"));
    assert_eq!(firing.labels.get(FOLDER_TITLE_LABEL), Some("infra"));
    assert_eq!(firing.labels.get("team"), Some("core"));
    assert_eq!(firing.starts_at, at(120));
    assert!(firing.ends_at > at(120));
    assert_eq!(
        firing.generator_url,
        "https://alerts.example.com/alerting/grafana/cpu-rule/view"
    );

    let normal = alerts
        .iter()
        .find(|a| a.labels.get("host") == Some("b"))
        .unwrap();
    assert_eq!(normal.ends_at, at(120));
}

#[tokio::test]
async fn test_rule_honours_disabled_folder_label() {
    let svc = service("[reserved_labels]\ndisabled = [\"grafana_folder\"]\n");
    let alerts = svc.test_rule(ctx(), rule(), "infra").await.unwrap();
    assert!(alerts.iter().all(|a| !a.labels.contains_key(FOLDER_TITLE_LABEL)));
}

#[tokio::test]
async fn test_rule_rejects_unauthorized_principal() {
    let svc = service_with("", Arc::new(DenyAll), 120);
    let err = svc.test_rule(ctx(), rule(), "infra").await.unwrap_err();
    assert_eq!(err.reason(), &RuntimeReason::Unauthorized);
}

#[tokio::test]
async fn test_rule_rejects_interval_off_base() {
    let svc = service("[evaluation]\nbase_interval = \"7s\"\n");
    let err = svc.test_rule(ctx(), rule(), "infra").await.unwrap_err();
    assert_eq!(err.reason(), &RuntimeReason::Core(CoreReason::Validation));
    assert!(err.reason().is_invalid_input());
}

// -- eval_queries ------------------------------------------------------------

#[tokio::test]
async fn eval_queries_defaults_condition_to_last_node() {
    let svc = service("");
    let req = EvalQueriesRequest {
        condition: String::new(),
        data: queries(),
        now: Some(at(180)),
    };
    let resp = svc.eval_queries(ctx(), req).await.unwrap();
    assert_eq!(resp.responses.len(), 3);
    let a = &resp.get("A").unwrap().frames[0];
    assert_eq!(a.row_len(), Some(3));
    assert!(a.notices.is_empty());
}

#[tokio::test]
async fn eval_queries_reports_optimized_range_queries() {
    let svc = service("[features]\nquery_optimization = true\n");
    let req = EvalQueriesRequest {
        condition: "C".into(),
        data: queries(),
        now: Some(at(180)),
    };
    let resp = svc.eval_queries(ctx(), req).await.unwrap();
    let a = &resp.get("A").unwrap().frames;
    assert_eq!(a[0].row_len(), Some(1));
    assert_eq!(a[0].notices.len(), 1);
    assert_eq!(a[0].notices[0].text, OPTIMIZATION_WARNING);
    assert!(a[1].notices.is_empty());
}

#[tokio::test]
async fn eval_queries_checks_datasource_access() {
    let svc = service_with("", Arc::new(DenyAll), 120);
    let req = EvalQueriesRequest {
        condition: "C".into(),
        data: queries(),
        now: None,
    };
    let err = svc.eval_queries(ctx(), req).await.unwrap_err();
    assert_eq!(err.reason(), &RuntimeReason::Unauthorized);
}

#[tokio::test]
async fn evaluate_once_reports_per_series_state() {
    let svc = service("");
    let condition = Condition {
        condition: "C".into(),
        data: queries(),
    };
    let results = svc.evaluate_once(ctx(), condition, at(60)).await.unwrap();
    assert_eq!(results.len(), 2);
    let a = results
        .iter()
        .find(|r| r.instance.get("host") == Some("a"))
        .unwrap();
    assert_eq!(a.state, ae_core::eval::State::Alerting);
}

// -- backtest ----------------------------------------------------------------

#[tokio::test]
async fn backtest_requires_feature() {
    let svc = service("[backtesting]\nenabled = false\n");
    let err = svc
        .backtest(ctx(), backtest_request(60, 180))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), &RuntimeReason::FeatureDisabled);
}

#[tokio::test]
async fn backtest_rejects_interval_off_base() {
    let svc = service("[evaluation]\nbase_interval = \"7s\"\n");
    let err = svc
        .backtest(ctx(), backtest_request(60, 180))
        .await
        .unwrap_err();
    assert!(err.reason().is_invalid_input());
}

#[tokio::test]
async fn backtest_rejects_inverted_range() {
    let svc = service("");
    let err = svc
        .backtest(ctx(), backtest_request(180, 60))
        .await
        .unwrap_err();
    assert!(err.reason().is_invalid_input());
}

#[tokio::test]
async fn backtest_produces_state_history() {
    let svc = service("");
    let frame = svc.backtest(ctx(), backtest_request(60, 180)).await.unwrap();
    assert_eq!(frame.name, ae_core::backtest::RESULT_FRAME_NAME);
    match &frame.fields[0].values {
        FieldValues::Time(times) => assert_eq!(times, &vec![at(60), at(120), at(180)]),
        other => panic!("unexpected time field {other:?}"),
    }
    // Time plus a state and a value field for each host.
    assert_eq!(frame.fields.len(), 5);
    let host_a_state = frame
        .fields
        .iter()
        .find(|f| f.labels.get("host") == Some("a") && !f.name.ends_with("_value"))
        .unwrap();
    match &host_a_state.values {
        FieldValues::String(states) => {
            assert!(states.iter().all(|s| s.as_deref() == Some("Alerting")))
        }
        other => panic!("unexpected state field {other:?}"),
    }
}

#[test]
fn short_uid_is_nine_alphanumerics() {
    let uid = short_uid();
    assert_eq!(uid.len(), 9);
    assert!(uid.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn backtest_request_parses_from_json() {
    let req: BacktestRequest = serde_json::from_value(serde_json::json!({
        "from": "1970-01-01T00:01:00Z",
        "to": "1970-01-01T00:03:00Z",
        "interval": "1m",
        "for": "2m",
        "condition": "C",
        "data": [],
        "no_data_state": "OK"
    }))
    .unwrap();
    assert_eq!(req.interval.as_duration(), Duration::from_secs(60));
    assert_eq!(req.for_duration.as_duration(), Duration::from_secs(120));
    assert_eq!(req.no_data_state, NoDataState::Ok);
    assert!(req.labels.is_empty());
}

// -- spawn_rule --------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn spawned_rule_emits_transitions_until_cancelled() {
    let svc = service("");
    let ctx = ctx();
    let cancel = ctx.cancel.clone();
    let (handle, mut rx) = svc
        .spawn_rule(ctx, rule(), Some("infra"), Arc::new(NoopImageService))
        .unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().any(|t| t.current.state == ae_core::eval::State::Alerting));

    // The clock is frozen, so the next cycle is a replay with no changes.
    let second = rx.recv().await.unwrap();
    assert!(second.iter().all(|t| !t.changed()));

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn spawn_rule_validates_before_starting() {
    let svc = service("");
    let mut bad = rule();
    bad.condition = "Z".into();
    let err = svc
        .spawn_rule(ctx(), bad, None, Arc::new(NoopImageService))
        .unwrap_err();
    assert!(err.reason().is_invalid_input());
}

#[test]
fn relative_range_default_covers_ten_minutes() {
    let q: AlertQuery = serde_json::from_value(serde_json::json!(
        {"ref_id": "B", "model": {"type": "reduce", "expression": "A", "reducer": "last"}}
    ))
    .unwrap();
    assert_eq!(q.relative_time_range, RelativeTimeRange::default());
    assert!(matches!(
        q.model,
        ae_core::model::QueryModel::Reduce { reducer: Reducer::Last, .. }
    ));
}
