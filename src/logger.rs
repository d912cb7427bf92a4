use snafu::ResultExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{registry, EnvFilter};

use crate::config::ServerConfig;
use crate::error::{ApplicationError, InitializeLoggerSnafu, LogFilterSnafu};

/// Logs to stdout and to a daily rolled JSON file under `log_dir`.
///
/// The returned guard flushes the file writer when dropped, so keep it alive in `main`.
pub fn init(config: &ServerConfig) -> Result<WorkerGuard, ApplicationError> {
    let filter = filter(config)?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = layer().with_ansi(false).json().with_writer(writer);

    let console_layer = layer().pretty().with_writer(std::io::stdout);

    let subscriber = registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).context(InitializeLoggerSnafu)?;

    Ok(guard)
}

/// `RUST_LOG` when set, the configured directives otherwise.
fn filter(config: &ServerConfig) -> Result<EnvFilter, ApplicationError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_filter).context(LogFilterSnafu {
            directives: config.log_filter.clone(),
        }),
    }
}
