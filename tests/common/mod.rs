//! Common test infrastructure
//!
//! This module provides the fakes and fixtures shared by the integration
//! tests. Tests should only import from this module, not from internal
//! submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{film, at, FakeCatalog, InMemoryIndex, MemoryWatermarkStore, FILM_A_ID, CHANGE_1000};
//!
//! #[tokio::test]
//! async fn test_full_load() {
//!     let catalog = FakeCatalog::new().with_film(film(FILM_A_ID, "A New Hope"), at(CHANGE_1000));
//!     let index = InMemoryIndex::new();
//!     let store = MemoryWatermarkStore::new();
//!     // build a Synchronizer from clones and run a cycle
//! }
//! ```

mod database;
mod fakes;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use database::TestDatabase;
#[allow(unused_imports)]
pub use fakes::{CatalogCall, FakeCatalog, InMemoryIndex, MemoryWatermarkStore};
#[allow(unused_imports)]
pub use fixtures::{at, fast_backoff, film, index_schema, sync_settings, uuid};
#[allow(unused_imports)]
pub use server::FakeElasticsearch;
