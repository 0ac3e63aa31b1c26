use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info};

use site_limits::bridge::{self, Bridge, ChannelEnforcer};
use site_limits::{BlockEnforcer, BlockPage, LatestActiveTab, RecordingEnforcer, SiteTracker};

use super::utils::Environment;

/// Run the tracker against a browser connected over stdin/stdout
pub fn serve(env: Environment, dry_run: bool) -> Result<()> {
    let block_page = BlockPage::new(&env.settings.blocking.block_page_url)?;

    info!("Site Limits v{}", env!("CARGO_PKG_VERSION"));
    info!("State file: {}", env.state_path.display());
    if dry_run {
        info!("DRY RUN MODE - block actions are logged only");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let guard = Arc::new(env.guard());
        let store = guard.store().clone();
        let activity = Arc::new(LatestActiveTab::new());

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (trigger_tx, trigger_rx) = mpsc::channel(64);

        let enforcer: Arc<dyn BlockEnforcer> = if dry_run {
            Arc::new(RecordingEnforcer::new())
        } else {
            Arc::new(ChannelEnforcer::new(outbound_tx.clone()))
        };

        let tracker = SiteTracker::new(
            store,
            activity.clone(),
            enforcer,
            block_page,
            env.settings.heartbeat_interval(),
        );
        let tracker_handle = tokio::spawn(async move { tracker.run(trigger_rx).await });

        let writer_handle = tokio::spawn(bridge::write_outbound(outbound_rx, tokio::io::stdout()));

        let bridge = Bridge::new(guard, activity, trigger_tx, outbound_tx);
        let result = bridge.run(BufReader::new(tokio::io::stdin())).await;

        // Closing the trigger and outbound channels stops the tracker and writer
        drop(bridge);
        tracker_handle.await.context("Tracker task panicked")?;

        match writer_handle.await.context("Writer task panicked")? {
            Ok(()) => {}
            Err(e) => error!("Output to browser failed: {:#}", e),
        }

        result
    })
}
