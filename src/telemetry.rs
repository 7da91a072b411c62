//! Logging setup.
//!
//! Console logs go to stderr so `run` can print its JSON result on stdout.
//! `REFINERY_LOG` (then `RUST_LOG`) overrides the default filter.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryOptions {
    pub format: LogFormat,
    pub verbose: bool,
    /// Daily-rolling JSON log file, in addition to stderr.
    pub log_file: Option<PathBuf>,
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "refinery=debug,refinery_common=debug" } else { "refinery=info" }
}

fn build_filter(verbose: bool) -> Result<EnvFilter> {
    if let Ok(spec) = std::env::var("REFINERY_LOG") {
        return EnvFilter::try_new(&spec).with_context(|| format!("Invalid REFINERY_LOG filter: '{}'", spec));
    }
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose))))
}

fn split_log_path(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?
        .to_string_lossy()
        .into_owned();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name))
}

/// Install the global subscriber. Keep the returned guard alive until exit,
/// or buffered file output is lost.
pub fn init(options: &TelemetryOptions) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(options.verbose)?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    match options.format {
        LogFormat::Pretty => layers.push(fmt::layer().with_writer(std::io::stderr).with_target(false).boxed()),
        LogFormat::Json => layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed()),
    }

    let mut guard = None;
    if let Some(path) = &options.log_file {
        let (dir, name) = split_log_path(path)?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        let (writer, worker) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
        layers.push(fmt::layer().json().with_ansi(false).with_writer(writer).boxed());
        guard = Some(worker);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}
