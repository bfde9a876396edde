use std::path::PathBuf;

use anyhow::Result;

use ae_core::model::AlertRule;

use crate::CommonArgs;
use crate::setup::{self, print_json};

pub async fn run(common: CommonArgs, rule: PathBuf, folder: String) -> Result<()> {
    let session = setup::open(&common)?;
    let rule: AlertRule = setup::read_json(&rule)?;

    let alerts = session
        .service
        .test_rule(session.ctx.clone(), rule, &folder)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    print_json(&alerts)
}
