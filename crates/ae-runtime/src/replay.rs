//! Query backend answering from a recorded fixture of labelled series.
//!
//! Supports datasource range and instant queries plus `reduce` and
//! `threshold` expressions. Math expressions are reported as node errors.

use std::collections::HashMap;
use std::path::Path;

use ae_core::eval::{EvalContext, QueryBackend};
use ae_core::labels::Labels;
use ae_core::model::{
    AlertQuery, DataResponse, DatasourceQuery, Field, FieldValues, Frame, QueryDataResponse,
    QueryModel, Reducer, ThresholdEvaluator,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayFixture {
    #[serde(default)]
    pub series: Vec<RecordedSeries>,
}

/// One labelled series as returned by `expr` on `datasource_uid`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordedSeries {
    pub datasource_uid: String,
    pub expr: String,
    #[serde(default)]
    pub labels: Labels,
    /// `[unix_seconds, value]` pairs in ascending time order.
    pub points: Vec<(i64, f64)>,
}

impl ReplayFixture {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read fixture {}: {e}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid fixture {}: {e}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Node output
// ---------------------------------------------------------------------------

struct Series {
    labels: Labels,
    points: Vec<(DateTime<Utc>, f64)>,
}

enum NodeData {
    Series(Vec<Series>),
    Numbers(Vec<(Labels, Option<f64>)>),
}

impl NodeData {
    fn into_frames(self, ref_id: &str) -> Vec<Frame> {
        let mut frames: Vec<Frame> = match self {
            NodeData::Series(series) => series
                .into_iter()
                .map(|s| {
                    let (times, values): (Vec<_>, Vec<_>) =
                        s.points.into_iter().map(|(t, v)| (t, Some(v))).unzip();
                    Frame::new(
                        "",
                        vec![
                            Field::new("Time", Labels::new(), FieldValues::Time(times)),
                            Field::new("Value", s.labels, FieldValues::Number(values)),
                        ],
                    )
                })
                .collect(),
            NodeData::Numbers(numbers) => numbers
                .into_iter()
                .map(|(labels, value)| Frame::new("", vec![Field::number("Value", labels, value)]))
                .collect(),
        };
        for f in &mut frames {
            f.ref_id = ref_id.to_string();
        }
        frames
    }
}

// ---------------------------------------------------------------------------
// ReplayBackend
// ---------------------------------------------------------------------------

pub struct ReplayBackend {
    fixture: ReplayFixture,
}

impl ReplayBackend {
    pub fn new(fixture: ReplayFixture) -> Self {
        Self { fixture }
    }

    fn datasource(&self, q: &AlertQuery, ds: &DatasourceQuery, now: DateTime<Utc>) -> NodeData {
        let (start, end) = q.relative_time_range.absolute(now);
        let series = self
            .fixture
            .series
            .iter()
            .filter(|s| s.datasource_uid == ds.datasource_uid && s.expr == ds.expr)
            .filter_map(|s| {
                let in_range = s
                    .points
                    .iter()
                    .filter_map(|(t, v)| DateTime::from_timestamp(*t, 0).map(|t| (t, *v)))
                    .filter(|(t, _)| *t >= start && *t <= end);
                let points: Vec<_> = if ds.is_range() {
                    in_range.collect()
                } else {
                    in_range.last().into_iter().collect()
                };
                (!points.is_empty()).then(|| Series {
                    labels: s.labels.clone(),
                    points,
                })
            })
            .collect();
        NodeData::Series(series)
    }
}

#[async_trait]
impl QueryBackend for ReplayBackend {
    async fn execute(
        &self,
        _ctx: &EvalContext,
        queries: &[AlertQuery],
        now: DateTime<Utc>,
    ) -> anyhow::Result<QueryDataResponse> {
        let mut done: HashMap<&str, Result<NodeData, String>> = HashMap::new();

        // Nodes may reference later nodes; sweep until nothing new resolves.
        loop {
            let before = done.len();
            for q in queries {
                if done.contains_key(q.ref_id.as_str()) {
                    continue;
                }
                let refs = q
                    .references()
                    .ok_or_else(|| anyhow::anyhow!("cannot resolve references of {}", q.ref_id))?;
                if !refs.iter().all(|r| done.contains_key(r.as_str())) {
                    continue;
                }
                let output = match &q.model {
                    QueryModel::Datasource(ds) => Ok(self.datasource(q, ds, now)),
                    QueryModel::Reduce { reducer, .. } => {
                        input(&done, &refs).and_then(|d| reduce_node(d, *reducer))
                    }
                    QueryModel::Threshold { evaluator, .. } => {
                        input(&done, &refs).and_then(|d| threshold_node(d, evaluator))
                    }
                    QueryModel::Math { .. } => {
                        Err("math expressions are not supported by the replay backend".to_string())
                    }
                };
                done.insert(q.ref_id.as_str(), output);
            }
            if done.len() == queries.len() {
                break;
            }
            if done.len() == before {
                anyhow::bail!("query graph contains unresolvable references");
            }
        }

        let mut response = QueryDataResponse::default();
        for (ref_id, output) in done {
            let data = match output {
                Ok(node) => DataResponse::frames(node.into_frames(ref_id)),
                Err(e) => DataResponse::error(e),
            };
            response.insert(ref_id, data);
        }
        Ok(response)
    }
}

fn input<'a>(
    done: &'a HashMap<&str, Result<NodeData, String>>,
    refs: &[String],
) -> Result<&'a NodeData, String> {
    let [only] = refs else {
        return Err(format!("expected exactly one input, got {}", refs.len()));
    };
    match done.get(only.as_str()) {
        Some(Ok(data)) => Ok(data),
        Some(Err(_)) => Err(format!("input {only} failed")),
        None => Err(format!("input {only} not found")),
    }
}

fn reduce_node(input: &NodeData, reducer: Reducer) -> Result<NodeData, String> {
    let numbers = match input {
        NodeData::Series(series) => series
            .iter()
            .map(|s| {
                let values: Vec<f64> = s.points.iter().map(|(_, v)| *v).collect();
                (s.labels.clone(), reduce_values(&values, reducer))
            })
            .collect(),
        NodeData::Numbers(numbers) => numbers.clone(),
    };
    Ok(NodeData::Numbers(numbers))
}

fn reduce_values(values: &[f64], reducer: Reducer) -> Option<f64> {
    if values.is_empty() {
        return (reducer == Reducer::Count).then_some(0.0);
    }
    let sum: f64 = values.iter().sum();
    Some(match reducer {
        Reducer::Last => values[values.len() - 1],
        Reducer::Mean => sum / values.len() as f64,
        Reducer::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Reducer::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Reducer::Sum => sum,
        Reducer::Count => values.len() as f64,
    })
}

fn threshold_node(input: &NodeData, evaluator: &ThresholdEvaluator) -> Result<NodeData, String> {
    let NodeData::Numbers(numbers) = input else {
        return Err("threshold expects reduced input".to_string());
    };
    let mut out = Vec::with_capacity(numbers.len());
    for (labels, value) in numbers {
        let verdict = match value {
            Some(v) => {
                let hit = evaluator
                    .matches(*v)
                    .ok_or_else(|| format!("threshold {:?} has too few parameters", evaluator.kind))?;
                Some(if hit { 1.0 } else { 0.0 })
            }
            None => None,
        };
        out.push((labels.clone(), verdict));
    }
    Ok(NodeData::Numbers(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    use ae_core::auth::Principal;
    use ae_core::model::{RelativeTimeRange, ThresholdKind};
    use std::time::Duration;

    fn fixture() -> ReplayFixture {
        serde_json::from_str(
            r#"{
                "series": [
                    {"datasource_uid": "prom", "expr": "cpu", "labels": {"host": "a"},
                     "points": [[0, 1.0], [60, 3.0], [120, 8.0]]},
                    {"datasource_uid": "prom", "expr": "cpu", "labels": {"host": "b"},
                     "points": [[0, 2.0], [60, 2.0]]}
                ]
            }"#,
        )
        .unwrap()
    }

    fn node(ref_id: &str, model: QueryModel) -> AlertQuery {
        AlertQuery {
            ref_id: ref_id.to_string(),
            relative_time_range: RelativeTimeRange {
                from: Duration::from_secs(300),
                to: Duration::ZERO,
            },
            model,
        }
    }

    fn graph(range: bool) -> Vec<AlertQuery> {
        vec![
            node(
                "A",
                QueryModel::Datasource(DatasourceQuery {
                    datasource_uid: "prom".into(),
                    datasource_type: "prometheus".into(),
                    expr: "cpu".into(),
                    range,
                    instant: !range,
                }),
            ),
            node(
                "B",
                QueryModel::Reduce {
                    expression: "A".into(),
                    reducer: Reducer::Max,
                },
            ),
            node(
                "C",
                QueryModel::Threshold {
                    expression: "$B".into(),
                    evaluator: ThresholdEvaluator {
                        kind: ThresholdKind::Gt,
                        params: vec![5.0],
                    },
                },
            ),
        ]
    }

    fn number(resp: &QueryDataResponse, ref_id: &str, host: &str) -> Option<f64> {
        let frame = resp
            .get(ref_id)
            .unwrap()
            .frames
            .iter()
            .find(|f| f.fields[0].labels.get("host") == Some(host))
            .unwrap();
        match &frame.fields[0].values {
            FieldValues::Number(v) => v[0],
            _ => panic!("not a number frame"),
        }
    }

    #[tokio::test]
    async fn range_reduce_threshold() {
        let backend = ReplayBackend::new(fixture());
        let ctx = EvalContext::new(Principal::new(1, "t"));
        let now = DateTime::from_timestamp(120, 0).unwrap();
        let resp = backend.execute(&ctx, &graph(true), now).await.unwrap();
        assert_eq!(number(&resp, "B", "a"), Some(8.0));
        assert_eq!(number(&resp, "B", "b"), Some(2.0));
        assert_eq!(number(&resp, "C", "a"), Some(1.0));
        assert_eq!(number(&resp, "C", "b"), Some(0.0));
        assert_eq!(resp.get("A").unwrap().frames[0].ref_id, "A");
    }

    #[tokio::test]
    async fn instant_query_takes_last_point_only() {
        let backend = ReplayBackend::new(fixture());
        let ctx = EvalContext::new(Principal::new(1, "t"));
        let now = DateTime::from_timestamp(60, 0).unwrap();
        let resp = backend.execute(&ctx, &graph(false), now).await.unwrap();
        let a = &resp.get("A").unwrap().frames[0];
        assert_eq!(a.row_len(), Some(1));
        assert_eq!(number(&resp, "B", "a"), Some(3.0));
    }

    #[tokio::test]
    async fn math_is_a_node_error() {
        let backend = ReplayBackend::new(fixture());
        let ctx = EvalContext::new(Principal::new(1, "t"));
        let mut queries = graph(true);
        queries.push(node(
            "D",
            QueryModel::Math {
                expression: "$B * 2".into(),
            },
        ));
        let now = DateTime::from_timestamp(60, 0).unwrap();
        let resp = backend.execute(&ctx, &queries, now).await.unwrap();
        assert!(resp.get("D").unwrap().error.is_some());
        assert!(resp.get("B").unwrap().error.is_none());
    }

    #[test]
    fn reducers() {
        let v = [1.0, 4.0, 2.0];
        assert_eq!(reduce_values(&v, Reducer::Last), Some(2.0));
        assert_eq!(reduce_values(&v, Reducer::Mean), Some(7.0 / 3.0));
        assert_eq!(reduce_values(&v, Reducer::Min), Some(1.0));
        assert_eq!(reduce_values(&v, Reducer::Max), Some(4.0));
        assert_eq!(reduce_values(&v, Reducer::Sum), Some(7.0));
        assert_eq!(reduce_values(&v, Reducer::Count), Some(3.0));
        assert_eq!(reduce_values(&[], Reducer::Last), None);
        assert_eq!(reduce_values(&[], Reducer::Count), Some(0.0));
    }
}
