use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;

use ae_config::AlertingConfig;
use ae_core::auth::{AllowAll, Principal};
use ae_core::clock::{Clock, ManualClock, SystemClock};
use ae_core::eval::EvalContext;
use ae_runtime::replay::{ReplayBackend, ReplayFixture};
use ae_runtime::service::AlertingService;
use ae_runtime::tracing_init::{WorkerGuard, init_tracing};

use crate::CommonArgs;

/// Everything a subcommand needs. Keep `_guard` alive until exit so file
/// logs are flushed.
pub struct Session {
    pub service: AlertingService,
    pub ctx: EvalContext,
    _guard: Option<WorkerGuard>,
}

pub fn open(common: &CommonArgs) -> Result<Session> {
    let config_path = common
        .config
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("config path '{}': {e}", common.config.display()))?;
    let config = AlertingConfig::load(&config_path)?;
    let base_dir = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent directory"))?;
    let guard = init_tracing(&config.logging, base_dir)?;

    let fixture = ReplayFixture::load(&common.fixture)?;
    tracing::debug!(
        domain = "conf",
        series = fixture.series.len(),
        fixture = %common.fixture.display(),
        "fixture loaded"
    );

    let clock: Arc<dyn Clock> = match common.now {
        Some(at) => Arc::new(ManualClock::new(at)),
        None => Arc::new(SystemClock),
    };
    let service = AlertingService::new(
        Arc::new(config),
        Arc::new(ReplayBackend::new(fixture)),
        Arc::new(AllowAll),
        clock,
    );
    let ctx = EvalContext::new(Principal::new(common.org_id, "aectl"));
    Ok(Session {
        service,
        ctx,
        _guard: guard,
    })
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("invalid {}: {e}", path.display()))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
