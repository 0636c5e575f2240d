//! Persisted high-water mark of the synchronization.
//!
//! The watermark says "every change at or before this instant is already in
//! the index". It is read once at the beginning of a cycle and written once
//! at its end.

mod file_store;

pub use file_store::{JsonFileWatermarkStore, WATERMARK_KEY};

use crate::error::Transient;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::path::PathBuf;
use thiserror::Error;

/// Formats accepted besides RFC 3339: the space-separated form produced by
/// `str(datetime)` and by Postgres' text output (`+00` offsets).
const FALLBACK_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"];

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("Failed to access state file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path:?} is not valid JSON: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("State file {path:?} does not hold a JSON object")]
    NotAnObject { path: PathBuf },

    #[error("Invalid watermark timestamp: {0:?}")]
    InvalidTimestamp(String),
}

impl Transient for WatermarkError {
    fn is_transient(&self) -> bool {
        false
    }
}

/// A point in time, together with the exact text it is persisted as.
///
/// Comparisons use the instant; [`Watermark::as_str`] returns the text, so a
/// watermark that was read and written back unchanged stays byte-identical.
#[derive(Debug, Clone)]
pub struct Watermark {
    text: String,
    instant: DateTime<Utc>,
}

impl Watermark {
    /// Parse a persisted watermark.
    pub fn parse(text: impl Into<String>) -> Result<Self, WatermarkError> {
        let text = text.into();
        let trimmed = text.trim();

        let parsed = DateTime::parse_from_rfc3339(trimmed).ok().or_else(|| {
            FALLBACK_FORMATS
                .iter()
                .find_map(|format| DateTime::parse_from_str(trimmed, format).ok())
        });

        match parsed {
            Some(instant) => Ok(Self {
                instant: instant.with_timezone(&Utc),
                text,
            }),
            None => Err(WatermarkError::InvalidTimestamp(text)),
        }
    }

    /// Watermark for a change time observed in the catalog, rendered as
    /// RFC 3339 (`2022-05-05T11:00:00+00:00`).
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        Self {
            text: instant.to_rfc3339(),
            instant,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Watermark {
    fn eq(&self, other: &Self) -> bool {
        self.instant == other.instant
    }
}

impl Eq for Watermark {}

impl Ord for Watermark {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant.cmp(&other.instant)
    }
}

impl PartialOrd for Watermark {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Storage for the single watermark slot.
///
/// Exactly one synchronizer owns a store at a time, so implementations do
/// not lock.
pub trait WatermarkStore: Send + Sync {
    /// Returns `None` when no synchronization has completed yet.
    fn read(&self) -> Result<Option<Watermark>, WatermarkError>;

    /// Replace the stored watermark. Must be atomic with respect to crashes.
    fn write(&self, watermark: &Watermark) -> Result<(), WatermarkError>;
}

impl<T: WatermarkStore + ?Sized> WatermarkStore for std::sync::Arc<T> {
    fn read(&self) -> Result<Option<Watermark>, WatermarkError> {
        (**self).read()
    }

    fn write(&self, watermark: &Watermark) -> Result<(), WatermarkError> {
        (**self).write(watermark)
    }
}
