//! Logging infrastructure - structured tracing for the pointer family
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log level, overridable through `RUST_LOG`
//! - Zero-cost when no subscriber is installed
//! - Console or file output, human-readable or JSON
//!
//! Console and file output are written synchronously unless
//! [`LogConfig::non_blocking`] is set, so the error logged right before a
//! counter overflow aborts the process is never lost in a buffer.
//!
//! The library itself never installs a subscriber; applications (and the
//! test suite) opt in through [`init`] or [`init_with_config`].

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub use tracing::{debug, error, info, trace, warn};

/// Set once a subscriber has been installed through this module
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
    /// Hand file writes to a background worker; see [`init_with_config`]
    pub non_blocking: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            non_blocking: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // NTSP_LOG_LEVEL: trace, debug, info, warn, error
        if let Some(level_str) = lookup("NTSP_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // NTSP_LOG_FILE: path to log file
        if let Some(path) = lookup("NTSP_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = lookup("NTSP_LOG_JSON").is_some();
        config.show_spans = lookup("NTSP_LOG_SPANS").is_some();
        config.non_blocking = lookup("NTSP_LOG_NON_BLOCKING").is_some();

        config
    }

    /// Create high-performance config (errors only)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Create debug config (every counter transition is logged)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("ntsp.log".to_string()),
            json_format: false,
            show_spans: true,
            non_blocking: false,
        }
    }

    fn file_path(&self) -> Option<&Path> {
        self.log_path
            .as_deref()
            .filter(|_| self.file_output)
            .map(Path::new)
    }
}

fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with configuration taken from the environment
///
/// See [`init_with_config`] for the returned guard.
pub fn init() -> Option<WorkerGuard> {
    init_with_config(LogConfig::from_env())
}

/// Initialize logging with custom configuration
///
/// Only the first call has any effect. A subscriber installed elsewhere in
/// the process is left in place.
///
/// Returns a `WorkerGuard` only for non-blocking file output. The caller owns
/// it and must keep it alive for as long as events should be written;
/// dropping it flushes the pending lines. Lines still queued when the process
/// aborts are lost, which is why synchronous output is the default.
pub fn init_with_config(config: LogConfig) -> Option<WorkerGuard> {
    let mut guard = None;

    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("ntsp={}", config.level.as_str().to_lowercase()))
        });

        let (layer, worker) = build_layer(&config);

        let installed = tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .is_ok();

        if installed {
            debug!(
                event = "logging_init",
                level = config.level.as_str(),
                json = config.json_format,
                non_blocking = config.non_blocking,
                "ntsp logging initialized"
            );
            guard = worker;
        }
    });

    guard
}

/// Build the formatting layer and, for non-blocking output, its worker guard
fn build_layer<S>(config: &LogConfig) -> (BoxedLayer<S>, Option<WorkerGuard>)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let span_events = if config.show_spans {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let ansi = config.file_path().is_none();
    let (writer, guard) = make_writer(config);

    let layer = if config.json_format {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_span_events(span_events)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_ids(cfg!(debug_assertions))
            .with_line_number(cfg!(debug_assertions))
            .boxed()
    };

    (layer, guard)
}

fn make_writer(config: &LogConfig) -> (BoxMakeWriter, Option<WorkerGuard>) {
    let Some(path) = config.file_path() else {
        return (BoxMakeWriter::new(io::stdout), None);
    };

    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path.file_name().unwrap_or(path.as_os_str());
    let appender = tracing_appender::rolling::never(directory, file_name);

    if config.non_blocking {
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (BoxMakeWriter::new(writer), Some(guard))
    } else {
        (BoxMakeWriter::new(appender), None)
    }
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Pointer-family logging functions
// ============================================================================

/// Log control block (and value) allocation
#[inline]
pub fn log_allocation(origin: &str, size: usize, block: *const u8) {
    trace!(
        event = "allocation",
        origin = origin,
        size_bytes = size,
        address = ?block,
        "Control block allocated"
    );
}

/// Log control block deallocation
#[inline]
pub fn log_deallocation(origin: &str, block: *const u8) {
    trace!(
        event = "deallocation",
        origin = origin,
        address = ?block,
        "Control block deallocated"
    );
}

/// Log destruction of the managed value after the last strong release
#[inline]
pub fn log_value_teardown(origin: &str, block: *const u8) {
    trace!(
        event = "value_teardown",
        origin = origin,
        address = ?block,
        "Last strong reference released, value destroyed"
    );
}

/// Log a failed weak-to-strong upgrade
#[inline]
pub fn log_lock_expired(block: *const u8) {
    trace!(
        event = "lock_expired",
        address = ?block,
        "Weak pointer lock on released value"
    );
}

/// Log a failed raw allocation
pub fn log_allocation_failure(size: usize, align: usize) {
    error!(
        event = "allocation_failure",
        size_bytes = size,
        align = align,
        "Control block allocation failed"
    );
}

/// Log a reference counter invariant violation
pub fn log_counter_violation(counter: &str, block: *const u8) {
    error!(
        event = "counter_violation",
        counter = counter,
        address = ?block,
        "Reference counter invariant violated"
    );
}
