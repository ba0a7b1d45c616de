//! HTTP endpoint handlers for the collector.
//!
//! - `/metrics`: Prometheus metrics endpoint
//! - `/health`: Health check endpoint
//! - `/snapshot`: Latest snapshot as JSON
//! - `/prompt`: Assistant context text
//! - `/doc`: Documentation endpoint

pub mod doc;
pub mod health;
pub mod metrics;
pub mod prompt;
pub mod snapshot;

// Re-export handlers
pub use doc::doc_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use prompt::prompt_handler;
pub use snapshot::snapshot_handler;
