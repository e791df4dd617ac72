//! Diagnostic logging setup. User facing output does not go through here.

use anyhow::{anyhow, Context};
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::{fs::OpenOptions, path::Path};

pub fn parse_level(level: &str) -> anyhow::Result<LevelFilter> {
    level
        .parse()
        .map_err(|_| anyhow!("invalid log level '{}'", level))
}

/// Installs the global logger. Logs go to `file` (appended) if given, to
/// stderr otherwise.
pub fn init(level: &str, file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder = Builder::new();
    builder.filter_level(parse_level(level)?);
    if let Some(path) = file {
        let out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(out)));
    }
    builder.try_init().context("installing logger")
}
