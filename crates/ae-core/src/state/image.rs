use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::labels::Labels;
use crate::model::RuleKey;

/// A captured screenshot of the panel behind an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// What to capture. Owned so captures can run on spawned tasks.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub rule_key: RuleKey,
    pub rule_title: String,
    pub labels: Labels,
}

/// Screenshot service. `Ok(None)` means the rule has nothing to capture.
#[async_trait]
pub trait ImageCapture: Send + Sync {
    async fn capture(&self, request: ImageRequest) -> anyhow::Result<Option<Image>>;
}

/// Never captures. Used by the test and backtest paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopImageService;

#[async_trait]
impl ImageCapture for NoopImageService {
    async fn capture(&self, _request: ImageRequest) -> anyhow::Result<Option<Image>> {
        Ok(None)
    }
}
