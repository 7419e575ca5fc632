//! Provide tracing, tailored to this program.
//!
//! At startup, the program should call [`init`] with the log section of
//! the configuration to install a tracing subscriber. Component levels
//! map to module-path directives, so `log.level_proxy = "debug"` turns
//! on debug logging for the proxy without drowning everything else.
//!
//! The rest of the program can include `use crate::tracing::prelude::*`
//! for convenient access to the `trace!()`, `debug!()`, `info!()`,
//! `warn!()`, and `error!()` macros.

use std::{env, fmt};

use time::OffsetDateTime;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{
        format::{DefaultFields, Writer as FmtWriter},
        time::FormatTime,
        FmtContext, FormatEvent, FormatFields,
    },
    prelude::*,
    registry::LookupSpan,
};

use crate::config::LogConfig;

#[cfg(target_os = "linux")]
use std::{io, os::unix::io::AsRawFd};

#[cfg(target_os = "linux")]
use nix::libc;

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Build the filter from the per-component levels, honoring `RUST_LOG`
/// overrides on top.
fn build_filter(config: &LogConfig) -> EnvFilter {
    let directives = format!(
        "hashrouter={app},hashrouter::stratum_v1={conn},hashrouter::proxy={proxy},hashrouter::allocator={sched},hashrouter::contract={contract}",
        app = config.level_app,
        conn = config.level_connection,
        proxy = config.level_proxy,
        sched = config.level_scheduler,
        contract = config.level_contract,
    );

    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(&directives);

    if let Ok(overrides) = env::var("RUST_LOG") {
        for directive in overrides.split(',') {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
    }
    filter
}

/// Check if stderr is connected to the systemd journal by validating
/// JOURNAL_STREAM.
///
/// Per systemd documentation, programs should parse the device and inode
/// numbers from JOURNAL_STREAM and compare them against stderr's file
/// descriptor to detect I/O redirection and ensure the connection is
/// genuine.
#[cfg(target_os = "linux")]
fn stderr_is_journal_stream() -> bool {
    let journal_stream = match env::var("JOURNAL_STREAM") {
        Ok(val) => val,
        Err(_) => return false,
    };

    let parts: Vec<&str> = journal_stream.split(':').collect();
    if parts.len() != 2 {
        return false;
    }

    let expected_dev: u64 = match parts[0].parse() {
        Ok(dev) => dev,
        Err(_) => return false,
    };

    let expected_ino: u64 = match parts[1].parse() {
        Ok(ino) => ino,
        Err(_) => return false,
    };

    let stderr = io::stderr();
    let fd = stderr.as_raw_fd();

    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut stat) } != 0 {
        return false;
    }

    stat.st_dev == expected_dev && stat.st_ino == expected_ino
}

/// Initialize logging.
///
/// Under systemd the journald layer is used; otherwise stdout, either
/// JSON lines or the human-readable custom format.
pub fn init(config: &LogConfig) {
    #[cfg(target_os = "linux")]
    {
        if stderr_is_journal_stream() {
            if let Ok(layer) = tracing_journald::layer() {
                tracing_subscriber::registry()
                    .with(build_filter(config))
                    .with(layer)
                    .init();
                return;
            } else {
                error!("Failed to initialize journald logging, using stdout.");
            }
        }
    }

    if config.json {
        tracing_subscriber::registry()
            .with(build_filter(config))
            .with(tracing_subscriber::fmt::layer().json())
            .init();
        return;
    }

    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTimer)
                .with_target(true)
                .with_ansi(config.color)
                .fmt_fields(DefaultFields::new())
                .event_format(CustomFormatter),
        )
        .init();
}

/// Custom event formatter that strips the crate prefix, colors the
/// level, and displays fields on a second line for readability.
struct CustomFormatter;

/// Visitor that collects fields into a string buffer.
struct FieldCollector {
    fields: Vec<(String, String)>,
    message: Option<String>,
}

impl FieldCollector {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            message: None,
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            let formatted = format!("{:?}", value);
            // Clean up Option formatting: Some("foo") -> foo
            let cleaned = if let Some(inner) = formatted.strip_prefix("Some(") {
                inner.strip_suffix(')').unwrap_or(inner).to_string()
            } else {
                formatted
            };
            self.fields.push((field.name().to_string(), cleaned));
        }
    }
}

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: FmtWriter<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldCollector::new();
        event.record(&mut visitor);

        let timestamp = LocalTimer;
        timestamp.format_time(&mut writer)?;
        write!(writer, " ")?;

        let level = *event.metadata().level();
        let (level_color, level_text) = match level {
            Level::ERROR => ("\x1b[31m", "ERROR"), // Red
            Level::WARN => ("\x1b[33m", "WARN "),  // Yellow
            Level::INFO => ("\x1b[32m", "INFO "),  // Green
            Level::DEBUG => ("\x1b[34m", "DEBUG"), // Blue
            Level::TRACE => ("\x1b[35m", "TRACE"), // Magenta
        };
        write!(writer, "{}{}\x1b[0m ", level_color, level_text)?;

        // Strip "hashrouter::" from our own code to reduce noise; keep
        // full paths from dependencies
        let target = event.metadata().target();
        let short_target = target.strip_prefix("hashrouter::").unwrap_or(target);
        write!(writer, "{}: ", short_target)?;

        if let Some(ref msg) = visitor.message {
            let clean_msg = msg.trim_matches('"');
            write!(writer, "{}", clean_msg)?;
        }

        // Structured fields on a second line, aligned under the message
        if !visitor.fields.is_empty() {
            writeln!(writer)?;
            // Timestamp (8 chars) + space + level (5 chars) + space = 15
            write!(writer, "\x1b[90m               ")?;
            for (i, (key, value)) in visitor.fields.iter().enumerate() {
                if i > 0 {
                    write!(writer, ", ")?;
                }
                let clean_value = value.trim_matches('"');
                write!(writer, "{}={}", key, clean_value)?;
            }
            write!(writer, "\x1b[0m")?;
        }

        writeln!(writer)
    }
}

// Provide our own timer that formats timestamps in local time to the
// nearest second. The default timer is UTC with an unwieldy format.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut FmtWriter<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        write!(
            w,
            "{}",
            now.format(time::macros::format_description!(
                "[hour]:[minute]:[second]"
            ))
            .unwrap(),
        )
    }
}
