use std::{path::PathBuf, time::Duration};

use crate::config::HttpHost;


#[derive(clap::Parser)]
#[command(version, about)]
pub struct Cli {
    #[clap(subcommand)]
    pub cmd: Command,

    /// Specifies config file location. If unset, the env variable
    /// `KAWA_LOADTEST_CONFIG` is checked, then 'config.toml' in the working
    /// directory. Without any config file, built-in defaults are used.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Runs the load test until the run time elapsed or Ctrl+C is pressed.
    Run(RunArgs),

    /// Checks the config and tries to obtain a token once. Useful before
    /// starting a long run.
    Check,

    /// Outputs a template of the configuration, including all config options
    /// with descriptions, great as a starting point.
    GenConfigTemplate {
        /// File to write it to. If unspecified, written to stdout.
        #[clap(short, long)]
        out: Option<PathBuf>,
    },
}

/// Overrides for the most commonly changed `load` and `target` settings.
#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Number of simulated users (`load.users`).
    #[clap(short, long)]
    pub users: Option<u32>,

    /// Users started per second (`load.spawn_rate`).
    #[clap(short = 'r', long)]
    pub spawn_rate: Option<f64>,

    /// Stop after this duration, e.g. "90s" or "10min" (`load.run_time`).
    #[clap(short = 't', long, value_parser = parse_duration)]
    pub run_time: Option<Duration>,

    /// Host of the API under test, e.g. "http://localhost:8080" (`target.host`).
    #[clap(long)]
    pub host: Option<HttpHost>,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    crate::config::parse_duration(s)
}


#[cfg(test)]
mod tests {
    use clap::Parser as _;

    use super::*;

    #[test]
    fn run_with_overrides() {
        let cli = Cli::try_parse_from([
            "kawa-loadtest", "--config", "load.toml",
            "run", "-u", "50", "--spawn-rate", "2.5", "-t", "5min", "--host", "http://localhost:8080",
        ]).unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("load.toml")));
        let Command::Run(args) = cli.cmd else { panic!("expected run command") };
        assert_eq!(args.users, Some(50));
        assert_eq!(args.spawn_rate, Some(2.5));
        assert_eq!(args.run_time, Some(Duration::from_secs(300)));
        assert_eq!(args.host.unwrap().to_string(), "http://localhost:8080");
    }

    #[test]
    fn bad_duration_is_rejected() {
        assert!(Cli::try_parse_from(["kawa-loadtest", "run", "-t", "5"]).is_err());
    }
}
