use std::{fs, io::{self, Write}};

use clap::Parser as _;

use crate::{
    auth::AuthOutcome,
    cli::{Cli, Command, RunArgs},
    config::Config,
    prelude::*,
};


mod auth;
mod cli;
mod config;
mod log;
mod prelude;
mod scenario;
mod session;
mod stats;
mod swarm;
mod util;


#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;


#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.cmd {
        Command::GenConfigTemplate { out } => {
            let template = config::template();
            match out {
                Some(path) => fs::write(path, &template)
                    .with_context(|| format!("failed to write '{}'", path.display()))?,
                None => io::stdout().write_all(template.as_bytes())?,
            }
        }

        Command::Check => {
            let config = load_config(&cli)?;
            let client = util::http_client();
            match auth::authenticate(&client, &config.auth).await {
                AuthOutcome::Authenticated(_) => {
                    info!("Config is valid and a token was obtained from {}", config.auth.token_url);
                }
                AuthOutcome::Unauthenticated(reason) => {
                    bail!("could not obtain a token from {}: {reason}", config.auth.token_url);
                }
            }
        }

        Command::Run(args) => {
            let mut config = load_config(&cli)?;
            apply_overrides(&mut config, args)?;
            let summary = swarm::run(config).await?;
            writeln!(io::stdout(), "\n{summary}")?;
        }
    }

    Ok(())
}

/// Loads the config and installs the logger configured in it.
fn load_config(cli: &Cli) -> Result<Config> {
    let path = config::locate(cli.config.as_deref());
    let config = config::load(path.as_deref())?;
    log::init(&config.log)?;

    match &path {
        Some(path) => info!("Loaded configuration from '{}'", path.display()),
        None => info!("No configuration file found, using defaults"),
    }
    debug!("Configuration: {config:#?}");
    Ok(config)
}

fn apply_overrides(config: &mut Config, args: &RunArgs) -> Result<()> {
    if let Some(users) = args.users {
        config.load.users = users;
    }
    if let Some(rate) = args.spawn_rate {
        swarm::spawn_interval(rate).map_err(|e| anyhow!("invalid --spawn-rate: {e}"))?;
        config.load.spawn_rate = rate;
    }
    if let Some(run_time) = args.run_time {
        config.load.run_time = run_time;
    }
    if let Some(host) = &args.host {
        config.target.host = host.clone();
    }
    Ok(())
}
