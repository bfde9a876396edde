use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use ae_core::mapper::transitions_to_postable_alerts;
use ae_core::model::AlertRule;
use ae_core::state::NoopImageService;

use crate::CommonArgs;
use crate::setup;

pub async fn run(common: CommonArgs, rule: PathBuf, folder: Option<String>) -> Result<()> {
    let session = setup::open(&common)?;
    let rule: AlertRule = setup::read_json(&rule)?;
    let cancel = session.ctx.cancel.clone();
    let external_url = session.service.config().external_url.clone();

    let (handle, mut rx) = session
        .service
        .spawn_rule(
            session.ctx.clone(),
            rule,
            folder.as_deref(),
            Arc::new(NoopImageService),
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    loop {
        tokio::select! {
            batch = rx.recv() => {
                let Some(transitions) = batch else { break };
                for alert in transitions_to_postable_alerts(&transitions, external_url.as_ref()) {
                    println!("{}", serde_json::to_string(&alert)?);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(domain = "sys", "interrupt received, stopping");
                cancel.cancel();
                break;
            }
        }
    }

    handle.await?;
    Ok(())
}
