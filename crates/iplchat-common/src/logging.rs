//! Logging bootstrap (C9).
//!
//! Installs a `tracing-subscriber` `fmt` layer on stdout for operator
//! visibility plus a second layer that writes a fixed append-only log file
//! format: each line `<timestamp> - [LEVEL] <message>`. The on-disk format
//! is an external interface (other tooling may tail it), so it is held
//! fixed independent of whatever the stdout layer looks like.

use std::fmt;
use std::path::Path;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Renders one event as `<timestamp> - [LEVEL] <message>`, ignoring span
/// context — a flat message line, not a structured field layout.
struct SpecLineFormat;

impl<S, N> FormatEvent<S, N> for SpecLineFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        write!(writer, "{now} - [{}] ", event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Initialize tracing: a human-readable stdout layer plus an append-only
/// file layer at `logfile_path`. `verbose` maps to `logVerbose` in the
/// config file — it widens the default filter from `info` to `debug` when
/// `RUST_LOG` is not set.
pub fn init(
    logfile_path: &Path,
    verbose: bool,
) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("iplchat={default_level},{default_level}")));

    if let Some(parent) = logfile_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logfile_path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(SpecLineFormat);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
