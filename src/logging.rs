use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber: stderr, plus a daily log file under
/// `log_dir` when given. Filtering follows `RUST_LOG` (default `info`).
///
/// Keep the returned guard alive for the life of the process so buffered
/// file records are flushed.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let Some(dir) = log_dir else {
    tracing_subscriber::registry()
      .with(filter)
      .with(stderr)
      .try_init()
      .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
    return Ok(None);
  };

  std::fs::create_dir_all(dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;
  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "offline-agent.log"));

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr)
    .with(fmt::layer().with_ansi(false).with_writer(writer))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(Some(guard))
}
