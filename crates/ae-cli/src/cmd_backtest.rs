use std::path::PathBuf;

use anyhow::Result;

use ae_runtime::service::BacktestRequest;

use crate::CommonArgs;
use crate::setup::{self, print_json};

pub async fn run(common: CommonArgs, request: PathBuf) -> Result<()> {
    let session = setup::open(&common)?;
    let req: BacktestRequest = setup::read_json(&request)?;

    let frame = session
        .service
        .backtest(session.ctx.clone(), req)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    print_json(&frame)
}
