use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
    sync::Mutex,
};
use serde::Deserialize;
use tracing::Subscriber;
use tracing_subscriber::{
    filter::{FilterFn, LevelFilter},
    prelude::*,
};

use crate::prelude::*;


#[derive(Debug, confique::Config)]
pub struct LogConfig {
    /// Minimum level per module path prefix.
    ///
    /// Keys are prefixes of a log's target (usually its module path), values
    /// are one of: off, error, warn, info, debug, trace. A log line is kept if
    /// the longest key that prefixes its target allows its level. Targets no
    /// key matches are dropped entirely, which silences dependencies unless
    /// listed here.
    ///
    /// The default keeps our own "debug" lines, which show token previews and
    /// response bodies. With many users, "info" keeps the output readable:
    ///
    ///    [log]
    ///    filters.kawa_loadtest = "info"
    ///    filters."kawa_loadtest::swarm" = "debug"
    ///    filters.hyper_util = "debug"
    #[config(default = { "kawa_loadtest": "debug" })]
    pub filters: Filters,

    /// Optional file that receives a copy of all log lines. Appended to, never
    /// truncated.
    pub file: Option<PathBuf>,

    /// Whether to print log lines to stdout.
    #[config(default = true)]
    pub stdout: bool,
}

#[derive(Debug, Deserialize)]
#[serde(try_from = "HashMap<String, String>")]
pub struct Filters(HashMap<String, LevelFilter>);

impl TryFrom<HashMap<String, String>> for Filters {
    type Error = String;

    fn try_from(raw: HashMap<String, String>) -> Result<Self, Self::Error> {
        let mut out = HashMap::with_capacity(raw.len());
        for (prefix, level) in raw {
            let level = level.parse::<LevelFilter>()
                .map_err(|_| format!("'{level}' (for '{prefix}') is not a log level"))?;
            out.insert(prefix, level);
        }
        Ok(Self(out))
    }
}

/// Whether a message from `target` at `level` passes the filter map. The
/// entry with the longest matching prefix decides.
fn is_enabled(
    filters: &HashMap<String, LevelFilter>,
    target: &str,
    level: &tracing::Level,
) -> bool {
    filters.iter()
        .filter(|(prefix, _)| target.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .is_some_and(|(_, max)| level <= max)
}

/// Opens `path` for appending and writes a blank-line separator, so that
/// consecutive runs are easy to tell apart.
fn open_log_file(path: &Path) -> Result<File> {
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("cannot open log file '{}'", path.display()))?;
    file.write_all(b"\n\n")
        .with_context(|| format!("cannot write to log file '{}'", path.display()))?;
    Ok(file)
}

/// Builds the subscriber all log output goes through, without installing it.
pub fn subscriber(config: &LogConfig) -> Result<impl Subscriber + Send + Sync + 'static> {
    let filters = config.filters.0.clone();
    let max_level = filters.values().max().copied().unwrap_or(LevelFilter::OFF);
    let filter = FilterFn::new(move |meta| is_enabled(&filters, meta.target(), meta.level()))
        .with_max_level_hint(max_level);

    let stdout = config.stdout
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stdout));
    let file = match &config.file {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    Ok(tracing_subscriber::registry().with(filter).with(file).with(stdout))
}

/// Installs the subscriber built from `config` as the process-wide default.
/// Must be called exactly once, before anything is logged.
pub fn init(config: &LogConfig) -> Result<()> {
    let subscriber = subscriber(config)?;
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install log subscriber")?;
    Ok(())
}
