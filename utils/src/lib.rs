use std::path::Path;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "relay.log";

/// Installs the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` and falls back to `info`. When `log_dir` is
/// given, events are additionally written to a daily-rolling file in that
/// directory; the returned guard must be kept alive for the file writer to
/// flush.
///
/// # Examples
///
/// ```
/// let _guard = utils::init_logging(None).expect("logging already initialised");
/// ```
pub fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let stdout_layer = fmt::layer().compact();

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init()?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .try_init()?;
            Ok(None)
        }
    }
}

/// Utility function for getting current time as duration since UNIX_EPOCH.
///
/// # Examples
///
/// ```
/// let now = utils::current_time_duration();
/// assert!(now.as_secs() > 0);
/// ```
pub fn current_time_duration() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_time_is_monotonic_enough() {
        let first = current_time_duration();
        let second = current_time_duration();
        assert!(second >= first);
    }

    #[test]
    fn second_init_is_rejected() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let first = init_logging(Some(dir.path()));
        assert!(first.is_ok());
        assert!(init_logging(None).is_err(), "global subscriber can only be set once");
    }
}
