use anyhow::{Context, Result};
use groupsnap_core::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_FILE_PREFIX: &str = "groupsnap.log";

/// Installs the global subscriber. `RUST_LOG` wins over `logging.level`.
///
/// The returned guard flushes the file writer and must live until exit.
pub fn init_tracing(settings: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level = settings.level.trim();
    let level = if level.is_empty() {
        "info".to_string()
    } else {
        level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stderr = fmt::layer().with_writer(std::io::stderr);

    let Some(directory) = settings.directory() else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr)
            .try_init()
            .context("install tracing subscriber")?;
        return Ok(None);
    };

    std::fs::create_dir_all(&directory)
        .with_context(|| format!("create log directory {}", directory.display()))?;
    let appender = tracing_appender::rolling::daily(&directory, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .context("install tracing subscriber")?;
    Ok(Some(guard))
}
