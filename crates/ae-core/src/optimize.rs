//! Range-to-instant rewrite for datasource queries whose every consumer only
//! reads the last sample.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{AlertQuery, Frame, Notice, NoticeSeverity, QueryModel, Reducer};


/// Datasource types known to answer an instant query with the same value a
/// range query ends with.
pub const OPTIMIZABLE_DATASOURCE_TYPES: &[&str] = &["prometheus", "loki"];

pub const OPTIMIZATION_WARNING: &str = "Query optimized from Range to Instant type; all uses exclusively require the last datapoint. Consider modifying your query to Instant type to ensure accuracy.";

/// A query that was rewritten from range to instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Optimization {
    pub ref_id: String,
}

/// Rewrite eligible range queries to instant queries.
///
/// A query qualifies when it targets a type in
/// [`OPTIMIZABLE_DATASOURCE_TYPES`], is a range query, is not the condition
/// node, and is consumed by at least one node where every consumer is a
/// `last` reduction. If any node's references cannot be resolved the input
/// is returned unchanged.
pub fn optimize_queries(
    condition: &str,
    queries: &[AlertQuery],
) -> (Vec<AlertQuery>, Vec<Optimization>) {
    let Some(consumers) = consumers(queries) else {
        return (queries.to_vec(), Vec::new());
    };

    let mut out = queries.to_vec();
    let mut optimizations = Vec::new();
    for q in &mut out {
        if q.ref_id == condition {
            continue;
        }
        let QueryModel::Datasource(ds) = &mut q.model else {
            continue;
        };
        if !ds.is_range() || !OPTIMIZABLE_DATASOURCE_TYPES.contains(&ds.datasource_type.as_str()) {
            continue;
        }
        let Some(users) = consumers.get(q.ref_id.as_str()) else {
            continue;
        };
        let last_only = users.iter().all(|u| {
            matches!(
                u.model,
                QueryModel::Reduce {
                    reducer: Reducer::Last,
                    ..
                }
            )
        });
        if !last_only {
            continue;
        }
        ds.range = false;
        ds.instant = true;
        optimizations.push(Optimization {
            ref_id: q.ref_id.clone(),
        });
    }
    (out, optimizations)
}

/// RefID -> nodes reading from it. `None` when a reference cannot be
/// resolved or points at an unknown node.
fn consumers(queries: &[AlertQuery]) -> Option<HashMap<&str, Vec<&AlertQuery>>> {
    let mut map: HashMap<&str, Vec<&AlertQuery>> = HashMap::new();
    for q in queries {
        for r in q.references()? {
            let target = queries.iter().find(|t| t.ref_id == r)?;
            map.entry(target.ref_id.as_str()).or_default().push(q);
        }
    }
    Some(map)
}

/// Attach the optimization warning to the first frame of every rewritten
/// query's output.
pub fn add_optimization_notices(
    response: &mut crate::model::QueryDataResponse,
    optimizations: &[Optimization],
) {
    for opt in optimizations {
        let Some(frame) = response
            .responses
            .get_mut(&opt.ref_id)
            .and_then(|r| r.frames.first_mut())
        else {
            continue;
        };
        warn_frame(frame);
    }
}

fn warn_frame(frame: &mut Frame) {
    frame.append_notice(Notice {
        severity: NoticeSeverity::Warning,
        text: OPTIMIZATION_WARNING.to_string(),
    });
}
