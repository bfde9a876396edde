use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{AlertQuery, AlertRule};

/// The caller on whose behalf rules are evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub org_id: i64,
    pub login: String,
}

impl Principal {
    pub fn new(org_id: i64, login: impl Into<String>) -> Self {
        Self {
            org_id,
            login: login.into(),
        }
    }
}

/// Access checks performed before a rule or its queries are executed.
#[async_trait]
pub trait RuleAuthorizer: Send + Sync {
    /// May `principal` read and evaluate every rule of this group?
    async fn authorize_rule_group(
        &self,
        principal: &Principal,
        rules: &[&AlertRule],
    ) -> anyhow::Result<()>;

    /// May `principal` query every datasource referenced by `queries`?
    async fn authorize_datasource_access(
        &self,
        principal: &Principal,
        queries: &[AlertQuery],
    ) -> anyhow::Result<()>;
}

/// Grants everything. Used by offline tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl RuleAuthorizer for AllowAll {
    async fn authorize_rule_group(&self, _: &Principal, _: &[&AlertRule]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn authorize_datasource_access(
        &self,
        _: &Principal,
        _: &[AlertQuery],
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
