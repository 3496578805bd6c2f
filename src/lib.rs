//! Bounded-concurrency image ingestion pipeline.
//!
//! Given a batch of candidate image URLs, validates, downloads, decodes,
//! scores and deduplicates them, and returns the best `top_k` normalized
//! JPEGs alongside their metadata. See [`PipelineConfig`] for tunables and
//! [`Coordinator`] for the entry point.

pub mod cache;
pub mod config;
pub mod decoder;
pub mod downloader;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod phash;
pub mod pipeline;
pub mod quality;
pub mod resize;
pub mod selector;
pub mod types;
pub mod validator;

pub use config::PipelineConfig;
pub use error::{ErrorKind, StageError};
pub use pipeline::Coordinator;
pub use tokio_util::sync::CancellationToken;
pub use types::{Candidate, DecodedImage, ImageMetadata, PipelineResult, PipelineStats, QualityMetrics};

/// Install a `tracing` subscriber driven by `RUST_LOG` (default `info`).
/// Call once, from the host binary's `main`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

impl Coordinator {
    /// Build a coordinator from `IMG_*` environment variables. This is the
    /// one place `anyhow` appears in this crate's public API: a
    /// misconfigured environment is a startup-time programmer error, not a
    /// per-URL failure, so it is reported with full context rather than
    /// folded into [`ErrorKind`].
    pub fn from_env() -> anyhow::Result<Self> {
        let config = PipelineConfig::from_env()?;
        Ok(Self::new(config))
    }
}
