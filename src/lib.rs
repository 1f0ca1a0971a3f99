//! Optic disc and cup highlighting for eye fundus photographs, served over
//! HTTP

pub mod config;
pub mod fetch;
pub mod imaging;
pub mod overlay;
pub mod pipeline;
pub mod segment;
pub mod server;

/// Process setup helpers
pub mod util {
    use crate::config::Settings;
    use tracing_subscriber::EnvFilter;

    /// Install the global tracing subscriber. `RUST_LOG` takes precedence
    /// over the configured filter.
    pub fn init_tracing(settings: &Settings) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
