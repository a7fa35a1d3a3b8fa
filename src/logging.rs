//! Logging bootstrap for hosts without their own subscriber.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install a global fmt subscriber writing to stderr.
///
/// Filtering follows `RUST_LOG`; without it, `info` and above. Hosts that
/// already install a subscriber should skip this.
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
