use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{AlertQuery, QueryDataResponse};

use super::EvalContext;

/// Executes a query/expression graph. Implementations resolve relative time
/// ranges against `now`, never the wall clock.
///
/// A returned `Err` means the whole execution failed; failures of single
/// nodes are reported through [`DataResponse::error`](crate::model::DataResponse).
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn execute(
        &self,
        ctx: &EvalContext,
        queries: &[AlertQuery],
        now: DateTime<Utc>,
    ) -> anyhow::Result<QueryDataResponse>;
}
