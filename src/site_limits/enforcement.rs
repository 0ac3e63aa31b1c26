use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;
use url::Url;

/// Instruction to take a tab away from a blocked domain
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockAction {
    pub tab_id: Option<u64>,
    pub domain: String,
    /// Block page the tab should be redirected to
    pub redirect_url: String,
}

/// Collaborator that carries out block actions (usually the browser shim)
pub trait BlockEnforcer: Send + Sync {
    fn enforce_block(&self, action: &BlockAction) -> Result<()>;
}

/// Builds block page URLs of the form `<base>?domain=<domain>`
#[derive(Debug, Clone)]
pub struct BlockPage {
    base: Url,
}

impl BlockPage {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid block page URL: {}", base_url))?;
        Ok(Self { base })
    }

    pub fn url_for(&self, domain: &str) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut().clear().append_pair("domain", domain);
        url.to_string()
    }

    pub fn action_for(&self, domain: &str, tab_id: Option<u64>) -> BlockAction {
        BlockAction {
            tab_id,
            domain: domain.to_string(),
            redirect_url: self.url_for(domain),
        }
    }
}

/// Enforcer that only records actions; used for dry runs and tests
#[derive(Debug, Default)]
pub struct RecordingEnforcer {
    actions: Mutex<Vec<BlockAction>>,
}

impl RecordingEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<BlockAction> {
        self.actions
            .lock()
            .map(|actions| actions.clone())
            .unwrap_or_default()
    }
}

impl BlockEnforcer for RecordingEnforcer {
    fn enforce_block(&self, action: &BlockAction) -> Result<()> {
        info!("Would block {} (tab {:?})", action.domain, action.tab_id);
        self.actions
            .lock()
            .map_err(|_| anyhow::anyhow!("Recording enforcer lock poisoned"))?
            .push(action.clone());
        Ok(())
    }
}
