//! Tracing initialization: EnvFilter, console format, optional file sink.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Initialize the global subscriber. Returns the file-appender guard, which
/// must stay alive for the process lifetime to flush buffered log lines.
pub fn init_tracing(
    json: bool,
    level: &str,
    file: Option<&str>,
    rotation: Option<&str>,
) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match file {
        Some(path) => {
            let appender = match rotation {
                Some("daily") => tracing_appender::rolling::daily(".", path),
                Some("hourly") => tracing_appender::rolling::hourly(".", path),
                _ => tracing_appender::rolling::never(".", path),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console = if json {
        // Keep stdout clean for result lines; logs go to stderr as JSON.
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();
    guard
}
