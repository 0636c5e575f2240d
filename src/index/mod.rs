//! Search index the catalog is loaded into.

mod elasticsearch;
mod schema;

pub use elasticsearch::{ClusterInfo, ClusterVersion, ElasticsearchClient};
pub use schema::load_index_schema;

use crate::error::{http_error_is_transient, Transient};
use crate::source::FilmDocument;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Request to Elasticsearch failed while {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Elasticsearch responded {status} while {context}: {body}")]
    Status {
        context: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("Failed to encode document {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read index schema {path:?}: {source}")]
    SchemaIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Index schema {path:?} is not a JSON object: {reason}")]
    SchemaInvalid { path: PathBuf, reason: String },
}

impl IndexError {
    pub(crate) fn http(context: &'static str, source: reqwest::Error) -> Self {
        IndexError::Http { context, source }
    }
}

impl Transient for IndexError {
    fn is_transient(&self) -> bool {
        match self {
            IndexError::Http { source, .. } => http_error_is_transient(source),
            IndexError::Status { status, .. } => matches!(
                *status,
                StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            IndexError::Encode { .. }
            | IndexError::SchemaIo { .. }
            | IndexError::SchemaInvalid { .. } => false,
        }
    }
}

/// A document the index refused within an otherwise accepted bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub id: String,
    /// 0 when the item carried no status.
    pub status: u16,
    pub reason: String,
}

/// Per-document result of a bulk upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: Vec<BulkFailure>,
}

/// Trait for search index backends.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create the index with `schema` unless it already exists.
    ///
    /// Returns true if the index was created by this call.
    async fn ensure_index(&self, name: &str, schema: &serde_json::Value)
        -> Result<bool, IndexError>;

    /// Create or replace each document under its own id.
    ///
    /// Documents rejected individually are reported in the outcome and do
    /// not fail the call.
    async fn bulk_upsert(
        &self,
        name: &str,
        documents: &[FilmDocument],
    ) -> Result<BulkOutcome, IndexError>;
}
