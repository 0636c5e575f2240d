//! Change extraction from the relational catalog.
//!
//! A source answers two questions: "what changed after this watermark" and
//! "give me these films as index documents, a page at a time".

mod models;
mod postgres;
pub mod queries;

pub use models::{ChangeSet, ChangedFilm, FilmDocument, PersonRef};
pub use postgres::{PgCatalogSource, PgSettings};

use crate::error::{pg_error_is_transient, Transient};
use crate::watermark::Watermark;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Database error while {context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("Malformed person list for film {film_id}: {source}")]
    Decode {
        film_id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    #[error("No film scan is open")]
    NoOpenScan,

    #[error("Not connected to the database")]
    NotConnected,
}

impl SourceError {
    pub fn database(context: &'static str, source: tokio_postgres::Error) -> Self {
        SourceError::Database { context, source }
    }
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        match self {
            SourceError::Database { source, .. } => pg_error_is_transient(source),
            SourceError::NotConnected => true,
            SourceError::Decode { .. } | SourceError::NoOpenScan => false,
        }
    }
}

/// Trait for catalog backends.
///
/// Scans are stateful: `select_all` / `select_by_ids` open a scan and
/// `next_page` walks it in change-time order until it returns an empty page.
#[async_trait]
pub trait CatalogSource: Send {
    /// Latest change time across films, persons and genres, `None` when the
    /// catalog is empty.
    async fn last_change_time(&mut self) -> Result<Option<Watermark>, SourceError>;

    /// Films affected by any change strictly after `watermark`, each listed
    /// once with the latest of its contributing change times, ordered by
    /// that time.
    async fn changed_since(&mut self, watermark: &Watermark) -> Result<ChangeSet, SourceError>;

    /// Open a scan over every film.
    async fn select_all(&mut self) -> Result<(), SourceError>;

    /// Open a scan over the given films.
    async fn select_by_ids(&mut self, ids: &[Uuid]) -> Result<(), SourceError>;

    /// Next page of at most `page_size` documents; empty once the scan is
    /// exhausted.
    async fn next_page(&mut self, page_size: usize) -> Result<Vec<FilmDocument>, SourceError>;
}
