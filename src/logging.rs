use std::io::{self, Write};

use tokio::sync::mpsc::UnboundedSender;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

struct ChannelWriter {
    tx: UnboundedSender<String>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf).to_string();
        let _ = self.tx.send(s);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Initialize logging: console plus a daily-rotating file sink under
/// `logs/`. `LOG_LEVEL` sets the filter (default `info`); `LOG_FILE_COUNT`
/// records the intended backup count, though `tracing_appender` itself
/// rotates daily without a built-in cap, so actual pruning is left to the
/// deployment's log rotation, same as it would be for any externally
/// rotated file. If `forward` is given, log lines are additionally pushed
/// onto that channel (used to stream logs to the dashboard if ever wired
/// up).
///
/// Returns the file appender's `WorkerGuard`; the caller must hold it for
/// the life of the process or buffered log lines are lost on exit.
pub fn init_logging(forward: Option<UnboundedSender<String>>) -> WorkerGuard {
    let app_name = format!(
        "{} API {}",
        std::env::var("APP_NAME").unwrap_or_else(|_| "APP".to_string()),
        std::env::var("APP_VERSION").unwrap_or_default(),
    );
    let backup_count: usize = std::env::var("LOG_FILE_COUNT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);

    std::fs::create_dir_all("logs").ok();
    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(fmt::layer());

    match forward {
        Some(tx) => {
            let channel_layer = fmt::layer().with_writer(move || ChannelWriter { tx: tx.clone() });
            registry.with(channel_layer).init();
        }
        None => registry.init(),
    }

    tracing::info!(app = %app_name, backup_count, "logging initialized");
    guard
}

