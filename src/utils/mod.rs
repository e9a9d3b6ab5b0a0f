//! Common utilities

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static TRACING: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `default_filter` (e.g. `"chatrag=info"`). Once a call
/// succeeds, later calls do nothing. Fails when another subscriber is
/// already installed.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    TRACING.get_or_try_init(|| {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Tracing subscriber not installed: {}", e))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing("chatrag=debug").unwrap();
        init_tracing("chatrag=info").unwrap();
        assert!(TRACING.get().is_some());
        tracing::info!("tracing initialised");
    }
}
