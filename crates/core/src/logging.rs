//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info,vkr_scene=debug,vkr_rhi=debug";

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise scene and GPU-layer
/// events are shown down to `debug`.
///
/// # Example
/// ```
/// vkr_core::init_logging();
/// tracing::info!("renderer starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second call (several tests in one binary) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging();
        init_logging();
        tracing::debug!("logging initialised twice");
    }
}
