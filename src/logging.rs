use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `level` is an EnvFilter directive
/// such as "info" or "modmail=debug"; an invalid directive falls back to
/// "info".
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
