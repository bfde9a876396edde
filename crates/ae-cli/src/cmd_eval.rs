use std::path::PathBuf;

use anyhow::Result;

use ae_runtime::service::EvalQueriesRequest;

use crate::CommonArgs;
use crate::setup::{self, print_json};

pub async fn run(common: CommonArgs, request: PathBuf) -> Result<()> {
    let session = setup::open(&common)?;
    let req: EvalQueriesRequest = setup::read_json(&request)?;

    let response = session
        .service
        .eval_queries(session.ctx.clone(), req)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    print_json(&response)
}
