//! Logging setup for hosts that don't install their own subscriber.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, with `level` as the
/// default directive. Does nothing if a subscriber is already installed.
pub fn init(level: tracing::Level) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init(tracing::Level::DEBUG);
        init(tracing::Level::INFO);
        tracing::info!("logging initialised");
    }
}
