//! Sync orchestration: one cycle reads the watermark, loads what changed
//! into the index and persists the new watermark.

mod runner;
mod synchronizer;

pub use runner::{run_loop, LoopExit};
pub use synchronizer::Synchronizer;

use crate::watermark::Watermark;
use std::fmt;

/// Phase of a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    DeterminingWatermark,
    FullLoad,
    IncrementalLoad,
    Persisting,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::DeterminingWatermark => "determining watermark",
            SyncState::FullLoad => "full load",
            SyncState::IncrementalLoad => "incremental load",
            SyncState::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// No watermark yet: every film is loaded.
    Full,
    /// Only films changed after the watermark are loaded.
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Incremental => f.write_str("incremental"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub index_name: String,
    pub batch_size: usize,
    /// Body of the index creation request (settings and mappings).
    pub index_schema: serde_json::Value,
}

/// Summary of a completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub mode: SyncMode,
    /// Watermark read at the start of the cycle.
    pub previous: Option<Watermark>,
    /// Watermark written at the end of the cycle. `None` only for a full
    /// load of an empty catalog.
    pub persisted: Option<Watermark>,
    /// Films found changed after the watermark (0 for full loads).
    pub changed: usize,
    pub pages: usize,
    pub documents: usize,
    pub rejected: usize,
}

impl CycleReport {
    /// True when the cycle moved the watermark forward.
    pub fn advanced(&self) -> bool {
        match (&self.previous, &self.persisted) {
            (None, Some(_)) => true,
            (Some(previous), Some(persisted)) => persisted > previous,
            _ => false,
        }
    }
}
