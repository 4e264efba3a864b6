//! Generation-mix ingestion for North American balancing authorities.
//!
//! One adapter per BA fetches the upstream feed and returns canonical
//! [`models::DataPoint`]s in UTC. Adapters are built by
//! [`fetcher::SourceFactory`] from a BA code and share one transport, clock
//! and reference store.

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod reference;

pub use error::{GenMixError, Result};
pub use fetcher::{GenerationSource, SourceContext, SourceFactory};
pub use models::{DataPoint, Frequency, Market, QueryMode, QuerySpec};

/// `RUST_LOG`-driven subscriber for the binaries; defaults to `genmix_lib=info`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("genmix_lib=info,genmix=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
