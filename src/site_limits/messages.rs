use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::site_limits::error::LimitError;
use crate::site_limits::guard::SiteGuard;
use crate::site_limits::state::{SiteUsage, UnlockOption};
use crate::site_limits::store::StateStore;

/// Requests sent by the block page, popup and options page
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetUnlockOptions {
        domain: String,
    },
    #[serde(rename_all = "camelCase")]
    AttemptUnlock {
        domain: String,
        secret_id: String,
        code: String,
    },
    UpdateConfig,
    GetUsage {
        domain: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Response {
    UnlockOptions {
        options: Vec<UnlockOption>,
    },
    Outcome {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Usage {
        usage: Option<SiteUsage>,
    },
}

impl Response {
    pub fn success() -> Self {
        Response::Outcome {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: &LimitError) -> Self {
        Response::Outcome {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Request/response dispatch for the UI surfaces
impl<S: StateStore> SiteGuard<S> {
    /// Answer one UI request; failures come back as `{success: false, error}`
    pub async fn handle_request(&self, request: Request, now: DateTime<Utc>) -> Response {
        debug!("Handling request: {:?}", request);

        match request {
            Request::GetUnlockOptions { domain } => match self.unlock_options(&domain).await {
                Ok(options) => Response::UnlockOptions { options },
                Err(e) => Response::failure(&e),
            },
            Request::AttemptUnlock {
                domain,
                secret_id,
                code,
            } => match self.attempt_unlock(&domain, &secret_id, &code, now).await {
                Ok(_) => Response::success(),
                Err(e) => Response::failure(&e),
            },
            Request::UpdateConfig => Response::success(),
            Request::GetUsage { domain } => match self.usage(&domain).await {
                Ok(usage) => Response::Usage { usage },
                Err(e) => Response::failure(&e),
            },
        }
    }
}
