use anyhow::{Context, Result};
use chrono::Utc;

use super::utils::Environment;
use crate::cli::SiteCommands;

pub fn run_site_command(env: Environment, command: SiteCommands) -> Result<()> {
    let guard = env.guard();
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        match command {
            SiteCommands::Add { domain, limit, keys } => {
                let domain = guard
                    .add_site(&domain, limit, &keys)
                    .await
                    .context("Failed to add site")?;
                println!("✓ Tracking {} ({} heartbeats per day)", domain, limit);
            }
            SiteCommands::List => {
                let sites = guard.sites().await?;
                if sites.is_empty() {
                    println!("No sites tracked.");
                    return Ok(());
                }

                let secrets = guard.secrets().await?;
                println!("{:<30} {:>10}  {}", "DOMAIN", "USED", "KEYS");
                for (domain, site) in &sites {
                    let labels: Vec<&str> = site
                        .authorized_secrets(&secrets)
                        .map(|secret| secret.label.as_str())
                        .collect();
                    println!(
                        "{:<30} {:>10}  {}",
                        domain,
                        format!("{}/{}", site.used_today, site.daily_limit),
                        if labels.is_empty() {
                            "(unprotected)".to_string()
                        } else {
                            labels.join(", ")
                        }
                    );
                }
            }
            SiteCommands::Remove { domain, code } => {
                guard
                    .remove_site(&domain, code.as_deref(), Utc::now())
                    .await
                    .with_context(|| format!("Failed to remove {}", domain))?;
                println!("✓ Stopped tracking {}", domain);
            }
        }

        Ok::<(), anyhow::Error>(())
    })
}
