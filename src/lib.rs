//! Catalog Search Sync Library
//!
//! Incremental synchronization of the movies catalog from Postgres into an
//! Elasticsearch index. This library exposes the modules for the binary and
//! for integration tests.

pub mod config;
pub mod error;
pub mod index;
pub mod retry;
pub mod source;
pub mod sync;
pub mod watermark;

// Re-export commonly used types for convenience
pub use error::{SyncError, Transient};
pub use index::{ElasticsearchClient, SearchIndex};
pub use retry::BackoffPolicy;
pub use source::{CatalogSource, PgCatalogSource};
pub use sync::{CycleReport, SyncSettings, Synchronizer};
pub use watermark::{JsonFileWatermarkStore, Watermark, WatermarkStore};
