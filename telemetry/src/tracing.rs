use std::path::Path;
use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter directive used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variable enabling log output in tests.
const ENABLE_TEST_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

static INIT_TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to bridge `log` records into tracing: {0}")]
    LogTracer(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to install the global tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the non-blocking file writer alive.
///
/// Dropping the flusher flushes buffered log lines, so it must be held until the process exits.
#[must_use = "dropping the flusher stops file logging"]
#[derive(Debug)]
pub struct LogFlusher {
    _guard: Option<WorkerGuard>,
}

/// Installs the global subscriber for `app_name`.
///
/// Logs go to stdout and, when `log_directory` is set, to a daily-rolling
/// `<log_directory>/<app_name>.log.<date>` file. The filter comes from `RUST_LOG` and defaults to
/// `info`.
pub fn init_tracing(
    app_name: &str,
    log_directory: Option<&Path>,
) -> Result<LogFlusher, TracingError> {
    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let stdout_layer = fmt::layer().with_target(true);

    let Some(log_directory) = log_directory else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .try_init()?;

        return Ok(LogFlusher { _guard: None });
    };

    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, log_directory, format!("{app_name}.log"));
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LogFlusher {
        _guard: Some(guard),
    })
}

/// Installs a test writer subscriber once per process when `ENABLE_TRACING` is set.
pub fn init_test_tracing() {
    if std::env::var(ENABLE_TEST_TRACING_ENV_NAME).is_err() {
        return;
    }

    INIT_TEST_TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

        // Another test harness may have installed a subscriber already.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
