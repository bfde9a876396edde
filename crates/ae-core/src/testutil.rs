//! Builders shared by the unit tests of this crate.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::Principal;
use crate::eval::{EvalContext, QueryBackend};
use crate::labels::Labels;
use crate::model::{
    AlertQuery, AlertRule, DataResponse, DatasourceQuery, ExecErrState, Field, FieldValues, Frame,
    NoDataState, QueryDataResponse, QueryModel, Reducer, RelativeTimeRange,
};

pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub(crate) fn ctx() -> EvalContext {
    EvalContext::new(Principal::new(1, "tester"))
}

pub(crate) fn ds_query(ref_id: &str, range: bool) -> AlertQuery {
    AlertQuery {
        ref_id: ref_id.to_string(),
        relative_time_range: RelativeTimeRange::default(),
        model: QueryModel::Datasource(DatasourceQuery {
            datasource_uid: "prom".to_string(),
            datasource_type: "prometheus".to_string(),
            expr: "up".to_string(),
            range,
            instant: !range,
        }),
    }
}

pub(crate) fn reduce(ref_id: &str, expression: &str, reducer: Reducer) -> AlertQuery {
    AlertQuery {
        ref_id: ref_id.to_string(),
        relative_time_range: RelativeTimeRange::default(),
        model: QueryModel::Reduce {
            expression: expression.to_string(),
            reducer,
        },
    }
}

pub(crate) fn math(ref_id: &str, expression: &str) -> AlertQuery {
    AlertQuery {
        ref_id: ref_id.to_string(),
        relative_time_range: RelativeTimeRange::default(),
        model: QueryModel::Math {
            expression: expression.to_string(),
        },
    }
}

/// `A` (datasource) -> `B` (reduce last), condition `B`.
pub(crate) fn rule(uid: &str, for_secs: u64) -> AlertRule {
    AlertRule {
        org_id: 1,
        uid: uid.to_string(),
        title: format!("rule {uid}"),
        condition: "B".to_string(),
        data: vec![ds_query("A", true), reduce("B", "A", Reducer::Last)],
        interval: Duration::from_secs(60),
        for_duration: Duration::from_secs(for_secs),
        no_data_state: NoDataState::NoData,
        exec_err_state: ExecErrState::Error,
        labels: Labels::from([("team", "core")]),
        annotations: Labels::from([("summary", "value is high")]),
    }
}

pub(crate) fn number_frame(labels: Labels, value: Option<f64>) -> Frame {
    Frame::new("", vec![Field::number("Value", labels, value)])
}

pub(crate) fn series_frame(labels: Labels, points: &[(i64, f64)]) -> Frame {
    Frame::new(
        "",
        vec![
            Field::new(
                "Time",
                Labels::new(),
                FieldValues::Time(points.iter().map(|(t, _)| ts(*t)).collect()),
            ),
            Field::new(
                "Value",
                labels,
                FieldValues::Number(points.iter().map(|(_, v)| Some(*v)).collect()),
            ),
        ],
    )
}

/// A response holding `frames` for the condition node `B` and a raw series for `A`.
pub(crate) fn condition_response(frames: Vec<Frame>) -> QueryDataResponse {
    let mut resp = QueryDataResponse::default();
    resp.insert("A", DataResponse::frames(Vec::new()));
    resp.insert("B", DataResponse::frames(frames));
    resp
}

type Script = dyn FnMut(DateTime<Utc>) -> anyhow::Result<QueryDataResponse> + Send;

/// Backend answering from a closure and counting executions.
pub(crate) struct ScriptedBackend {
    script: Mutex<Box<Script>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn new(
        script: impl FnMut(DateTime<Utc>) -> anyhow::Result<QueryDataResponse> + Send + 'static,
    ) -> Self {
        Self {
            script: Mutex::new(Box::new(script)),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryBackend for ScriptedBackend {
    async fn execute(
        &self,
        _ctx: &EvalContext,
        _queries: &[AlertQuery],
        now: DateTime<Utc>,
    ) -> anyhow::Result<QueryDataResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        (script)(now)
    }
}

/// Backend that never answers.
pub(crate) struct HangingBackend;

#[async_trait]
impl QueryBackend for HangingBackend {
    async fn execute(
        &self,
        _ctx: &EvalContext,
        _queries: &[AlertQuery],
        _now: DateTime<Utc>,
    ) -> anyhow::Result<QueryDataResponse> {
        std::future::pending().await
    }
}
