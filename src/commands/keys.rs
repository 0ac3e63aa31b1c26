use anyhow::{Context, Result};

use site_limits::{CodeValidator, Secret};

use super::utils::Environment;
use crate::cli::KeyCommands;

pub fn run_key_command(env: Environment, command: KeyCommands) -> Result<()> {
    let guard = env.guard();
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        match command {
            KeyCommands::Add { label, duration } => {
                let secret = guard
                    .add_secret(&label, duration)
                    .await
                    .context("Failed to add key")?;

                println!("✓ Key created");
                println!();
                print_key_details(&secret)?;
                println!();
                println!("Share the secret or URI with {} and keep it out of your own reach.", secret.label);
            }
            KeyCommands::List => {
                let secrets = guard.secrets().await?;
                if secrets.is_empty() {
                    println!("No keys configured. Add one with 'site-limits key add <label>'.");
                    return Ok(());
                }

                println!("{:<40} {:<20} {}", "ID", "LABEL", "UNLOCK");
                for secret in secrets.values() {
                    println!(
                        "{:<40} {:<20} {} min",
                        secret.id, secret.label, secret.duration_minutes
                    );
                }
            }
            KeyCommands::Show { id } => {
                let secrets = guard.secrets().await?;
                let secret = secrets
                    .get(&id)
                    .with_context(|| format!("No key with ID {}", id))?;
                print_key_details(secret)?;
            }
            KeyCommands::Remove { id } => {
                let secret = guard.remove_secret(&id).await?;
                println!("✓ Removed key {} ({})", secret.label, secret.id);
                println!("  Sites that only trusted this key can now be removed without a code.");
            }
        }

        Ok::<(), anyhow::Error>(())
    })
}

fn print_key_details(secret: &Secret) -> Result<()> {
    println!("ID:       {}", secret.id);
    println!("Label:    {}", secret.label);
    println!("Unlock:   {} minutes", secret.duration_minutes);
    println!("Secret:   {}", secret.secret_material);
    println!(
        "URI:      {}",
        CodeValidator::provisioning_uri(&secret.label, &secret.secret_material)?
    );
    Ok(())
}
