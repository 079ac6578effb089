use crate::config::ensure_dir;
use crate::error::QueueError;
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex, Once};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

static LOGGER_INITIALIZED: Once = Once::new();

// Keep the guard alive for the lifetime of the program
static FILE_APPENDER_GUARD: LazyLock<Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    LazyLock::new(|| Mutex::new(None));

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for the daily-rolling `queue.log` file; console only when `None`
    pub log_dir: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Emit JSON lines to the log file instead of plain text
    pub json_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            default_filter: "info".to_string(),
            json_file: false,
        }
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), QueueError> {
    if let Some(ref dir) = config.log_dir {
        ensure_dir(dir)?;
    }

    LOGGER_INITIALIZED.call_once(|| {
        let env_filter = || {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.default_filter))
        };

        // Console logging - compact format
        let console_layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_filter(env_filter());

        let file_layer = config.log_dir.as_ref().map(|dir| {
            let file_appender = tracing_appender::rolling::daily(dir, "queue.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            if let Ok(mut guard_mutex) = FILE_APPENDER_GUARD.lock() {
                *guard_mutex = Some(guard);
            }

            if config.json_file {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(env_filter())
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(env_filter())
                    .boxed()
            }
        });

        // Another subscriber may already be installed (tests, host application)
        let _ = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init();
    });

    Ok(())
}

// Convenience functions for different log levels, tagged with the emitting component
pub fn log_debug(component: &str, message: &str) {
    debug!(component = component, "{}", message);
}

pub fn log_info(component: &str, message: &str) {
    info!(component = component, "{}", message);
}

pub fn log_warn(component: &str, message: &str) {
    warn!(component = component, "{}", message);
}

pub fn log_error(component: &str, message: &str) {
    error!(component = component, "{}", message);
}
