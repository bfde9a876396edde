use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use url::Url;

use crate::logging::LoggingConfig;
use crate::types::HumanDuration;
use crate::validate;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// `[evaluation]`: limits shared by live, test and backtest evaluation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Rule intervals must be a positive multiple of this.
    pub base_interval: HumanDuration,
    /// Upper bound for one query execution. Zero disables the timeout.
    pub timeout: HumanDuration,
    /// Consecutive evaluations a label set may be absent before its
    /// instance is resolved as stale.
    pub missing_series_evals_to_resolve: u32,
    /// Maximum simultaneous image captures within one evaluation cycle.
    pub max_image_concurrency: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            base_interval: HumanDuration::from(std::time::Duration::from_secs(10)),
            timeout: HumanDuration::from(std::time::Duration::from_secs(30)),
            missing_series_evals_to_resolve: 2,
            max_image_concurrency: 4,
        }
    }
}

/// `[backtesting]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BacktestingConfig {
    pub enabled: bool,
    /// Smallest rule interval a backtest accepts.
    pub min_interval: HumanDuration,
    /// Largest number of evaluation steps a single backtest may replay.
    pub max_steps: usize,
}

impl Default for BacktestingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval: HumanDuration::from(std::time::Duration::from_secs(10)),
            max_steps: 10_000,
        }
    }
}

/// `[features]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Rewrite range queries that only feed `last` reductions into instant
    /// queries before evaluation.
    pub query_optimization: bool,
}

/// `[reserved_labels]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReservedLabelsConfig {
    /// Reserved labels that must not be injected into alert instances.
    pub disabled: Vec<String>,
}

/// Reserved labels that may be switched off through `[reserved_labels]`.
pub const DISABLEABLE_RESERVED_LABELS: &[&str] = &["grafana_folder"];

impl ReservedLabelsConfig {
    pub fn is_disabled(&self, label: &str) -> bool {
        self.disabled.iter().any(|l| l == label)
    }
}

// ---------------------------------------------------------------------------
// AlertingConfig (resolved, validated)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Base URL used to build generator URLs on outgoing alerts.
    pub external_url: Option<Url>,
    pub evaluation: EvaluationConfig,
    pub backtesting: BacktestingConfig,
    pub features: FeatureFlags,
    pub reserved_labels: ReservedLabelsConfig,
    pub logging: LoggingConfig,
}

impl AlertingConfig {
    /// Read and parse an `alerting.toml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }
}

impl FromStr for AlertingConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a validated [`AlertingConfig`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let config: AlertingConfig = toml::from_str(toml_str)?;
        validate::validate(&config)?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::logging::LogFormat;

    const FULL_TOML: &str = r#"
external_url = "https://alerts.example.com/"

[evaluation]
base_interval = "15s"
timeout = "1m"
missing_series_evals_to_resolve = 3
max_image_concurrency = 2

[backtesting]
enabled = false
min_interval = "30s"
max_steps = 500

[features]
query_optimization = true

[reserved_labels]
disabled = ["grafana_folder"]

[logging]
level = "debug"
format = "json"
modules = { "ae_core::state" = "trace" }
"#;

    #[test]
    fn parse_full_config() {
        let cfg: AlertingConfig = FULL_TOML.parse().unwrap();
        assert_eq!(
            cfg.external_url.as_ref().map(Url::as_str),
            Some("https://alerts.example.com/")
        );
        assert_eq!(cfg.evaluation.base_interval.as_duration(), Duration::from_secs(15));
        assert_eq!(cfg.evaluation.timeout.as_duration(), Duration::from_secs(60));
        assert_eq!(cfg.evaluation.missing_series_evals_to_resolve, 3);
        assert_eq!(cfg.evaluation.max_image_concurrency, 2);
        assert!(!cfg.backtesting.enabled);
        assert_eq!(cfg.backtesting.min_interval.as_duration(), Duration::from_secs(30));
        assert_eq!(cfg.backtesting.max_steps, 500);
        assert!(cfg.features.query_optimization);
        assert!(cfg.reserved_labels.is_disabled("grafana_folder"));
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.logging.directives(), "debug,ae_core::state=trace");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: AlertingConfig = "".parse().unwrap();
        assert!(cfg.external_url.is_none());
        assert_eq!(cfg.evaluation.base_interval.as_duration(), Duration::from_secs(10));
        assert_eq!(cfg.evaluation.missing_series_evals_to_resolve, 2);
        assert!(cfg.backtesting.enabled);
        assert_eq!(cfg.backtesting.max_steps, 10_000);
        assert!(!cfg.features.query_optimization);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn rejects_zero_base_interval() {
        let err = "[evaluation]\nbase_interval = \"0s\"\n"
            .parse::<AlertingConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("base_interval"));
    }

    #[test]
    fn rejects_unknown_reserved_label() {
        let err = "[reserved_labels]\ndisabled = [\"alertname\"]\n"
            .parse::<AlertingConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("alertname"));
    }

    #[test]
    fn rejects_zero_max_steps() {
        assert!("[backtesting]\nmax_steps = 0\n".parse::<AlertingConfig>().is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = std::env::temp_dir().join(format!("ae-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("alerting.toml");
        std::fs::write(&path, FULL_TOML).unwrap();
        let cfg = AlertingConfig::load(&path).unwrap();
        assert_eq!(cfg.backtesting.max_steps, 500);
        std::fs::remove_dir_all(&dir).ok();
    }
}
