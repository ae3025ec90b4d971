pub mod archive_builder;
pub mod archive_index;
pub mod config;
pub mod error;
pub mod join;
pub mod locator;
pub mod manifest;
pub mod npy;
pub mod pipeline;
pub mod simuleval;
pub mod sources;
pub mod summary;
pub mod units;

pub use error::*;
pub use archive_builder::{ArchiveStatus, BuildReceipt};
pub use archive_index::OffsetIndex;
pub use config::{PairLayout, PrepConfig, SourceRoot, Split};
pub use join::{JoinConfig, JoinOutput, JoinSources};
pub use locator::FeatureLocator;
pub use manifest::ManifestRecord;
pub use summary::{RecoveredKind, RunSummary};

/// Install the fmt subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(service: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    tracing::debug!(service, "tracing initialized");
}
