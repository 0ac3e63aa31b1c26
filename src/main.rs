use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Args, Commands};
use commands::utils::{Environment, init_logging, settings_path};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Args {
        command,
        config,
        state,
        verbose,
    } = Args::parse();
    let settings_path = settings_path(config)?;

    let load_env = || -> Result<Environment> {
        let env = Environment::load(&settings_path, state)?;
        init_logging(verbose, &env.settings.logging.level);
        Ok(env)
    };

    match command {
        Commands::InitConfig { force } => {
            init_logging(verbose, "info");
            commands::init_config(&settings_path, force)
        }
        Commands::Serve { dry_run } => commands::serve(load_env()?, dry_run),
        Commands::Key { command } => commands::run_key_command(load_env()?, command),
        Commands::Site { command } => commands::run_site_command(load_env()?, command),
        Commands::Status { domain } => commands::status(load_env()?, domain),
        Commands::Check { domain } => commands::check(load_env()?, domain),
        Commands::Unlock { domain, key, code } => {
            commands::unlock(load_env()?, domain, key, code)
        }
    }
}
