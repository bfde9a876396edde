use crate::alerting::{AlertingConfig, DISABLEABLE_RESERVED_LABELS};

/// Internal validation, called automatically by `AlertingConfig::from_str` / `load`.
pub(crate) fn validate(config: &AlertingConfig) -> anyhow::Result<()> {
    let eval = &config.evaluation;
    if eval.base_interval.is_zero() {
        anyhow::bail!("evaluation.base_interval must be > 0");
    }
    if eval.missing_series_evals_to_resolve == 0 {
        anyhow::bail!("evaluation.missing_series_evals_to_resolve must be >= 1");
    }
    if eval.max_image_concurrency == 0 {
        anyhow::bail!("evaluation.max_image_concurrency must be >= 1");
    }

    let bt = &config.backtesting;
    if bt.max_steps == 0 {
        anyhow::bail!("backtesting.max_steps must be > 0");
    }
    if bt.min_interval.is_zero() {
        anyhow::bail!("backtesting.min_interval must be > 0");
    }

    if let Some(url) = &config.external_url
        && url.cannot_be_a_base()
    {
        anyhow::bail!("external_url {:?} cannot be used as a base URL", url.as_str());
    }

    for label in &config.reserved_labels.disabled {
        if !DISABLEABLE_RESERVED_LABELS.contains(&label.as_str()) {
            anyhow::bail!(
                "reserved_labels.disabled: {:?} is not a reserved label that can be disabled (expected one of {:?})",
                label,
                DISABLEABLE_RESERVED_LABELS,
            );
        }
    }

    Ok(())
}
