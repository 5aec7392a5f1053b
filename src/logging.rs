use std::path::Path;
use tracing::Subscriber;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Install the global tracing subscriber
///
/// Console output follows `RUST_LOG` (default `info`). Under `log_dir`, one
/// daily file per level (`debug.log.<date>`, `info.log.<date>`, ...) takes
/// that level and everything more severe.
pub fn init(log_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stdout).with_ansi(true))
        .with(level_file(log_dir, "debug.log", LevelFilter::DEBUG))
        .with(level_file(log_dir, "info.log", LevelFilter::INFO))
        .with(level_file(log_dir, "warn.log", LevelFilter::WARN))
        .with(level_file(log_dir, "error.log", LevelFilter::ERROR))
        .init();

    Ok(())
}

fn level_file<S>(dir: &Path, name: &str, level: LevelFilter) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(tracing_appender::rolling::daily(dir, name))
        .with_ansi(false)
        .with_filter(level)
}
