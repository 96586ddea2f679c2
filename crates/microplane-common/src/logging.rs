//! ---
//! mp_section: "03-logging"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Tracing subscriber setup and lifecycle event helpers."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "MICROPLANE_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Non-blocking writer guards; dropping them would stop log delivery.
static WRITER_GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Initialize the tracing subscriber for `binary` supervising `group`.
///
/// The filter comes from `MICROPLANE_LOG`, then `RUST_LOG`, then `info`.
/// Stdout gets structured JSON or pretty output per `config.format`; a daily
/// rolling JSON file named `{prefix}-{group}.log` is written under
/// `config.directory`, where the prefix defaults to `binary`.
///
/// Calling it again is a no-op once a subscriber has been installed.
pub fn init_tracing(binary: &str, group: &str, config: &LoggingConfig) -> Result<()> {
    if WRITER_GUARDS.get().is_some() {
        return Ok(());
    }
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "unable to create log directory {}",
            config.directory.display()
        )
    })?;

    let file_name = log_file_name(binary, group, config);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, &file_name));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer().with_writer(stdout_writer).boxed(),
    };
    let file_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_ansi(false)
        .with_writer(file_writer)
        .boxed();

    let installed = tracing_subscriber::registry()
        .with(log_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if !installed {
        // Another subscriber owns the process; our writers are unused.
        return Ok(());
    }
    WRITER_GUARDS.get_or_init(|| [file_guard, stdout_guard]);

    info!(
        binary,
        group,
        log_file = %config.directory.join(&file_name).display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}

fn log_filter() -> EnvFilter {
    let directive = std::env::var(LOG_ENV).or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV));
    match directive {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!(
                "ignoring invalid log directive {:?} ({}); using {}",
                directive, err, DEFAULT_DIRECTIVE
            );
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        Err(_) => EnvFilter::new(DEFAULT_DIRECTIVE),
    }
}

/// File name base for the rolling log; the appender appends the date.
fn log_file_name(binary: &str, group: &str, config: &LoggingConfig) -> String {
    let prefix = config.file_prefix.as_deref().unwrap_or(binary);
    let group: String = group
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{}.log", prefix, group)
}

/// Structured context attached to lifecycle events.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Name of the orchestrated group.
    pub group: Option<&'a str>,
    /// Service the event is about, if any.
    pub service: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: &'a str) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_service(mut self, service: &'a str) -> Self {
        self.service = Some(service);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    Success,
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with a success/fault outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    // `tracing::event!` needs a constant level, hence the two arms.
    match outcome {
        SystemEventOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            group = ctx.group.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            group = ctx.group.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            format: LogFormat::Pretty,
            file_prefix: Some("unit".to_owned()),
        };
        init_tracing("microplaned", "edge", &config).expect("tracing initialises");
        assert!(config.directory.is_dir());
        init_tracing("microplaned", "edge", &config).expect("second call is a no-op");
    }

    #[test]
    fn log_file_is_named_after_binary_and_group() {
        let mut config = LoggingConfig::default();
        assert_eq!(
            log_file_name("microplaned", "edge/site 1", &config),
            "microplaned-edge_site_1.log"
        );
        config.file_prefix = Some("plane".to_owned());
        assert_eq!(log_file_name("microplaned", "edge", &config), "plane-edge.log");
    }

    #[test]
    fn lifecycle_events_accept_partial_context() {
        let ctx = LogContext::new().with_group("edge").with_service("etcd");
        assert_eq!(ctx.group, Some("edge"));
        assert_eq!(ctx.service, Some("etcd"));
        log_system_event(
            Some(&ctx),
            "service.ready",
            "etcd reported ready",
            SystemEventOutcome::Success,
        );
        log_system_event(
            None,
            "system.partial_shutdown",
            "kubelet did not stop",
            SystemEventOutcome::Fault,
        );
    }
}
