//! Structured logging for scriptbin
//!
//! Everything goes to stderr and the default level is `warn`: the launcher
//! shares its stderr with the script it runs, so it stays quiet unless asked.
//!
//! # Log Format Conventions
//!
//! - `operation`: pipeline stage (e.g., "cache.lookup", "cache.commit", "build", "lock")
//! - `status`: result of the stage ("hit", "miss", "success", "error")
//! - `fingerprint`: first 12 hex characters of the script fingerprint
//!
//! # Examples
//!
//! ```rust,ignore
//! use tracing::info;
//!
//! info!(
//!     operation = "cache.commit",
//!     status = "success",
//!     fingerprint = %fp.short(),
//!     "build committed"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

const LOG_ENV: &str = "SCRIPTBIN_LOG";
const LOG_FORMAT_ENV: &str = "SCRIPTBIN_LOG_FORMAT";
const DEFAULT_LEVEL: &str = "warn";

/// Custom formatter that shows "scriptbin" instead of full module path
struct ScriptbinFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for ScriptbinFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f%:z")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(scriptbin)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(scriptbin): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// Same layout without color (CI)
    Compact,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Parse from `SCRIPTBIN_LOG_FORMAT`
    pub fn from_env() -> Self {
        Self::parse(
            std::env::var(LOG_FORMAT_ENV).ok().as_deref(),
            std::env::var_os("CI").is_some(),
        )
    }

    fn parse(value: Option<&str>, in_ci: bool) -> Self {
        match value.unwrap_or_default().to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if in_ci => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `SCRIPTBIN_LOG`: log filter (e.g. "debug", "scriptbin=info"), falls back to `RUST_LOG`
/// - `SCRIPTBIN_LOG_FORMAT`: "pretty", "compact" or "json"
/// - `CI`: if set, defaults to compact format
pub fn init() {
    let filter = env_filter();
    let ansi = io::IsTerminal::is_terminal(&io::stderr());

    let result = match LogFormat::from_env() {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(ScriptbinFormatter { with_ansi: ansi })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(ScriptbinFormatter { with_ansi: false })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("{} failed to initialize logging: {}", crate::cli_utils::scriptbin_prefix(), e);
    }
}
