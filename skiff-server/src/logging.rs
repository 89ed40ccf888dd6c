//! Logging setup for server binaries
//!
//! The crate logs through `tracing`; this installs a subscriber for
//! applications that do not bring their own.

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Fails if a global subscriber is already set.
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

/// Initialize logging (no-op when the `logging` feature is disabled)
#[cfg(not(feature = "logging"))]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_once() {
        let first = init_logging();
        #[cfg(feature = "logging")]
        {
            // a second global subscriber is refused
            if first.is_ok() {
                assert!(init_logging().is_err());
            }
        }
        #[cfg(not(feature = "logging"))]
        assert!(first.is_ok());
    }
}
