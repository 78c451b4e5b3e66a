mod config;
mod error;
mod metrics;
mod pipeline;

pub use config::ScanConfig;
pub use error::PipelineError;
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use pipeline::{ScanReport, ScanSession};

/// Install the default `tracing` subscriber for the binaries.
/// `RUST_LOG` overrides the filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "megabonk_scan=debug,mb_vision=debug,mb_capture=debug".into()),
        )
        .init();
}
