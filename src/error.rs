//! Error taxonomy shared by the sync pipeline.
//!
//! Every component error can tell whether it is a transient connectivity
//! failure (retried with backoff) or a permanent one (propagated to the
//! cycle boundary).

use crate::index::IndexError;
use crate::source::SourceError;
use crate::watermark::WatermarkError;
use thiserror::Error;

/// Classification used by the retry combinator.
pub trait Transient {
    /// Returns true if the failure is a connectivity problem worth retrying.
    fn is_transient(&self) -> bool;
}

/// Errors that abort a sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Watermark store error: {0}")]
    Watermark(#[from] WatermarkError),
}

impl Transient for SyncError {
    fn is_transient(&self) -> bool {
        match self {
            SyncError::Source(e) => e.is_transient(),
            SyncError::Index(e) => e.is_transient(),
            SyncError::Watermark(e) => e.is_transient(),
        }
    }
}

/// SQLSTATE classes of errors that clear up once the server recovers:
/// connection exceptions (08) and insufficient resources (53), which covers
/// `too_many_connections`.
const PG_TRANSIENT_CLASSES: [&str; 2] = ["08", "53"];

/// Class 57 codes that mean "the server went away".
const PG_UNAVAILABLE_CODES: [&str; 3] = ["57P01", "57P02", "57P03"];

/// Decides whether a Postgres error is a connectivity failure.
pub fn pg_error_is_transient(err: &tokio_postgres::Error) -> bool {
    if err.is_closed() {
        return true;
    }
    if let Some(state) = err.code() {
        return sqlstate_is_transient(state.code());
    }
    caused_by_io(err)
}

/// Decides whether a SQLSTATE code reports a temporary server condition.
pub fn sqlstate_is_transient(code: &str) -> bool {
    PG_TRANSIENT_CLASSES
        .iter()
        .any(|class| code.starts_with(class))
        || PG_UNAVAILABLE_CODES.contains(&code)
}

/// Decides whether an HTTP client error is a connectivity failure.
pub fn http_error_is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || caused_by_io(err)
}

/// Renders an error followed by every cause in its source chain.
///
/// Causes already spelled out by their parent's message are not repeated,
/// so `"Database error while connecting: db error"` caused by a `db error`
/// caused by `FATAL: too many connections` renders each part once.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let message = cause.to_string();
        if !rendered.ends_with(&message) {
            rendered.push_str(": ");
            rendered.push_str(&message);
        }
        current = cause.source();
    }
    rendered
}

/// Walks the source chain looking for an I/O error (reset sockets, refused
/// connections, timeouts below the protocol layer).
fn caused_by_io(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = err.source();
    while let Some(cause) = current {
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return true;
        }
        current = cause.source();
    }
    false
}
