use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::site_limits::enforcement::{BlockAction, BlockEnforcer};
use crate::site_limits::guard::SiteGuard;
use crate::site_limits::messages::{Request, Response};
use crate::site_limits::store::StateStore;
use crate::site_limits::tracker::{ActiveTab, LatestActiveTab, Trigger};

/// Events reported by the browser
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    /// A document was committed in a tab
    #[serde(rename_all = "camelCase")]
    Navigation {
        tab_id: Option<u64>,
        url: String,
        #[serde(default)]
        frame_id: u64,
    },
    /// Focus moved; `url` is null when no browser tab is focused
    #[serde(rename_all = "camelCase")]
    ActiveTab {
        tab_id: Option<u64>,
        url: Option<String>,
    },
    /// UI request; the response echoes `id`
    Message {
        id: serde_json::Value,
        request: Request,
    },
}

/// Instructions and responses sent back to the browser
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    #[serde(rename_all = "camelCase")]
    Block {
        tab_id: Option<u64>,
        domain: String,
        url: String,
    },
    Response {
        id: serde_json::Value,
        response: Response,
    },
}

impl From<&BlockAction> for Outbound {
    fn from(action: &BlockAction) -> Self {
        Outbound::Block {
            tab_id: action.tab_id,
            domain: action.domain.clone(),
            url: action.redirect_url.clone(),
        }
    }
}

/// Enforcer that forwards block actions to the outbound writer
#[derive(Debug, Clone)]
pub struct ChannelEnforcer {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ChannelEnforcer {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { outbound }
    }
}

impl BlockEnforcer for ChannelEnforcer {
    fn enforce_block(&self, action: &BlockAction) -> Result<()> {
        self.outbound
            .send(Outbound::from(action))
            .map_err(|_| anyhow::anyhow!("Outbound channel closed"))
    }
}

/// Line-delimited JSON bridge to the browser-side shim
///
/// Each inbound line is one [`Inbound`] event and each outbound line is one
/// [`Outbound`] instruction or response. Events are routed to the tracker,
/// the activity source and the guard.
pub struct Bridge<S> {
    guard: Arc<SiteGuard<S>>,
    activity: Arc<LatestActiveTab>,
    triggers: mpsc::Sender<Trigger>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl<S: StateStore> Bridge<S> {
    pub fn new(
        guard: Arc<SiteGuard<S>>,
        activity: Arc<LatestActiveTab>,
        triggers: mpsc::Sender<Trigger>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            guard,
            activity,
            triggers,
            outbound,
        }
    }

    /// Handle one inbound event at `now`
    pub async fn handle(&self, event: Inbound, now: DateTime<Utc>) -> Result<()> {
        match event {
            Inbound::Navigation {
                tab_id,
                url,
                frame_id,
            } => {
                if frame_id != 0 {
                    debug!("Ignoring sub-frame navigation to {}", url);
                    return Ok(());
                }
                if self.activity.navigated(tab_id, &url) {
                    debug!("Focused tab {:?} moved to {}", tab_id, url);
                }
                self.triggers
                    .send(Trigger::Navigation { url, tab_id })
                    .await
                    .context("Tracker is no longer running")?;
            }
            Inbound::ActiveTab { tab_id, url } => {
                self.activity
                    .update(url.map(|url| ActiveTab { tab_id, url }));
            }
            Inbound::Message { id, request } => {
                let response = self.guard.handle_request(request, now).await;
                self.outbound
                    .send(Outbound::Response { id, response })
                    .map_err(|_| anyhow::anyhow!("Outbound channel closed"))?;
            }
        }

        Ok(())
    }

    /// Read events until the input closes
    pub async fn run<R: AsyncBufRead + Unpin>(&self, reader: R) -> Result<()> {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await.context("Failed to read from browser")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event: Inbound = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping malformed message: {}", e);
                    continue;
                }
            };

            self.handle(event, Utc::now()).await?;
        }

        info!("Browser closed the connection");
        Ok(())
    }
}

/// Serialize outbound messages, one per line, until every sender is dropped
pub async fn write_outbound<W: AsyncWrite + Unpin>(
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut writer: W,
) -> Result<()> {
    while let Some(message) = outbound.recv().await {
        let mut line = serde_json::to_vec(&message).context("Failed to serialize message")?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .context("Failed to write to browser")?;
        writer.flush().await.context("Failed to flush output")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site_limits::auth::RateLimiter;
    use crate::site_limits::state::TrackedSite;
    use crate::site_limits::store::{MemoryStore, SharedStore, StateDocument};
    use crate::site_limits::enforcement::{BlockPage, RecordingEnforcer};
    use crate::site_limits::tracker::{ActivitySource, SiteTracker};
    use chrono::Local;
    use serde_json::json;

    struct Harness {
        bridge: Bridge<MemoryStore>,
        activity: Arc<LatestActiveTab>,
        triggers: mpsc::Receiver<Trigger>,
        outbound: mpsc::UnboundedReceiver<Outbound>,
    }

    fn make_harness() -> Harness {
        let mut document = StateDocument::default();
        document.blocked_sites.insert(
            "example.com".to_string(),
            TrackedSite::new(3, Default::default()),
        );
        let guard = Arc::new(SiteGuard::new(
            SharedStore::new(MemoryStore::with_document(document)),
            RateLimiter::new(5, 60),
        ));
        let activity = Arc::new(LatestActiveTab::new());
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Harness {
            bridge: Bridge::new(guard, activity.clone(), trigger_tx, out_tx),
            activity,
            triggers: trigger_rx,
            outbound: out_rx,
        }
    }

    #[test]
    fn test_parse_inbound() {
        let event: Inbound = serde_json::from_value(json!({
            "type": "navigation",
            "tabId": 1,
            "url": "https://example.com/",
            "frameId": 0
        }))
        .unwrap();
        assert_eq!(
            event,
            Inbound::Navigation {
                tab_id: Some(1),
                url: "https://example.com/".to_string(),
                frame_id: 0,
            }
        );

        let event: Inbound =
            serde_json::from_value(json!({"type": "activeTab", "tabId": null, "url": null})).unwrap();
        assert_eq!(event, Inbound::ActiveTab { tab_id: None, url: None });

        let event: Inbound = serde_json::from_value(json!({
            "type": "message",
            "id": 7,
            "request": {"action": "getUsage", "domain": "example.com"}
        }))
        .unwrap();
        assert!(matches!(event, Inbound::Message { .. }));
    }

    #[test]
    fn test_outbound_block_shape() {
        let action = BlockAction {
            tab_id: Some(2),
            domain: "example.com".to_string(),
            redirect_url: "https://localhost/blocked.html?domain=example.com".to_string(),
        };
        assert_eq!(
            serde_json::to_value(Outbound::from(&action)).unwrap(),
            json!({
                "type": "block",
                "tabId": 2,
                "domain": "example.com",
                "url": "https://localhost/blocked.html?domain=example.com"
            })
        );
    }

    #[tokio::test]
    async fn test_top_level_navigation_becomes_trigger() {
        let mut harness = make_harness();

        harness
            .bridge
            .handle(
                Inbound::Navigation {
                    tab_id: Some(1),
                    url: "https://example.com/ad".to_string(),
                    frame_id: 3,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        harness
            .bridge
            .handle(
                Inbound::Navigation {
                    tab_id: Some(1),
                    url: "https://example.com/".to_string(),
                    frame_id: 0,
                },
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(
            harness.triggers.recv().await,
            Some(Trigger::Navigation {
                url: "https://example.com/".to_string(),
                tab_id: Some(1),
            })
        );
        assert!(harness.triggers.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_active_tab_updates_activity() {
        let harness = make_harness();

        harness
            .bridge
            .handle(
                Inbound::ActiveTab {
                    tab_id: Some(5),
                    url: Some("https://example.com/".to_string()),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(harness.activity.active_tab().unwrap().tab_id, Some(5));

        harness
            .bridge
            .handle(Inbound::ActiveTab { tab_id: None, url: None }, Utc::now())
            .await
            .unwrap();
        assert!(harness.activity.active_tab().is_none());
    }

    #[tokio::test]
    async fn test_navigation_in_focused_tab_moves_heartbeats() {
        let harness = make_harness();
        let tracker = SiteTracker::new(
            harness.bridge.guard.store().clone(),
            harness.activity.clone(),
            Arc::new(RecordingEnforcer::new()),
            BlockPage::new("https://localhost/blocked.html").unwrap(),
            std::time::Duration::from_secs(60),
        );

        let events = [
            Inbound::ActiveTab {
                tab_id: Some(1),
                url: Some("https://docs.rs/".to_string()),
            },
            Inbound::Navigation {
                tab_id: Some(1),
                url: "https://www.example.com/".to_string(),
                frame_id: 0,
            },
        ];
        for event in events {
            harness.bridge.handle(event, Utc::now()).await.unwrap();
        }

        let outcome = tracker.tick(Trigger::Heartbeat, Local::now()).await.unwrap().unwrap();
        assert_eq!(outcome.domain, "example.com");
        assert_eq!(outcome.used, Some(1));
    }

    #[tokio::test]
    async fn test_navigation_elsewhere_keeps_focused_url() {
        let harness = make_harness();

        let events = [
            Inbound::ActiveTab {
                tab_id: Some(1),
                url: Some("https://docs.rs/".to_string()),
            },
            Inbound::Navigation {
                tab_id: Some(2),
                url: "https://example.com/".to_string(),
                frame_id: 0,
            },
            Inbound::Navigation {
                tab_id: Some(1),
                url: "https://example.com/embed".to_string(),
                frame_id: 4,
            },
            Inbound::Navigation {
                tab_id: None,
                url: "https://example.com/".to_string(),
                frame_id: 0,
            },
        ];
        for event in events {
            harness.bridge.handle(event, Utc::now()).await.unwrap();
        }

        assert_eq!(harness.activity.active_tab().unwrap().url, "https://docs.rs/");
    }

    #[tokio::test]
    async fn test_run_answers_messages_and_skips_garbage() {
        let mut harness = make_harness();
        let input = concat!(
            "this is not json\n",
            "\n",
            "{\"type\":\"message\",\"id\":\"a1\",\"request\":{\"action\":\"getUsage\",\"domain\":\"example.com\"}}\n",
        );

        harness.bridge.run(input.as_bytes()).await.unwrap();

        assert_eq!(
            serde_json::to_value(harness.outbound.recv().await.unwrap()).unwrap(),
            json!({
                "type": "response",
                "id": "a1",
                "response": {"usage": {"domain": "example.com", "used": 0, "limit": 3}}
            })
        );
    }

    #[tokio::test]
    async fn test_write_outbound_emits_lines() {
        let (tx, rx) = mpsc::unbounded_channel();
        let enforcer = ChannelEnforcer::new(tx.clone());

        enforcer
            .enforce_block(&BlockAction {
                tab_id: None,
                domain: "example.com".to_string(),
                redirect_url: "https://localhost/blocked.html?domain=example.com".to_string(),
            })
            .unwrap();
        tx.send(Outbound::Response {
            id: json!(1),
            response: Response::success(),
        })
        .unwrap();
        drop(tx);
        drop(enforcer);

        let mut output = Vec::new();
        write_outbound(rx, &mut output).await.unwrap();

        let lines: Vec<&str> = std::str::from_utf8(&output).unwrap().lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("{\"type\":\"block\""));
        assert_eq!(lines[1], "{\"type\":\"response\",\"id\":1,\"response\":{\"success\":true}}");
    }
}
