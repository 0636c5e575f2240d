use super::{CycleReport, SyncMode, SyncSettings, SyncState};
use crate::error::SyncError;
use crate::index::SearchIndex;
use crate::source::CatalogSource;
use crate::watermark::{Watermark, WatermarkStore};
use tracing::info;

#[derive(Debug, Default)]
struct LoadStats {
    pages: usize,
    documents: usize,
    rejected: usize,
}

/// Drives one source, one index and one watermark store through sync cycles.
///
/// The watermark is only written after every page of the cycle reached the
/// index. Any error returned by [`Synchronizer::run_cycle`] leaves the stored
/// watermark untouched, so the next cycle covers the same window again.
pub struct Synchronizer<S, I, W> {
    source: S,
    index: I,
    store: W,
    settings: SyncSettings,
    state: SyncState,
}

impl<S, I, W> Synchronizer<S, I, W>
where
    S: CatalogSource,
    I: SearchIndex,
    W: WatermarkStore,
{
    pub fn new(source: S, index: I, store: W, settings: SyncSettings) -> Self {
        Self {
            source,
            index,
            store,
            settings,
            state: SyncState::Idle,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Run one cycle to completion. The synchronizer is back in
    /// [`SyncState::Idle`] when this returns, whatever the outcome.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, SyncError> {
        let result = self.cycle().await;
        self.transition(SyncState::Idle);
        result
    }

    async fn cycle(&mut self) -> Result<CycleReport, SyncError> {
        self.index
            .ensure_index(&self.settings.index_name, &self.settings.index_schema)
            .await?;

        self.transition(SyncState::DeterminingWatermark);
        let previous = self.store.read()?;
        match &previous {
            Some(watermark) => info!("Current watermark: {}", watermark),
            None => info!("No watermark stored, starting a full load"),
        }

        match previous {
            None => self.full_load().await,
            Some(watermark) => self.incremental_load(watermark).await,
        }
    }

    async fn full_load(&mut self) -> Result<CycleReport, SyncError> {
        self.transition(SyncState::FullLoad);

        // Read before the scan: changes landing mid-scan are caught next cycle
        let ceiling = self.source.last_change_time().await?;
        match &ceiling {
            Some(ceiling) => info!("Full load up to {}", ceiling),
            None => info!("Catalog is empty"),
        }

        self.source.select_all().await?;
        let stats = self.load_batches().await?;

        self.transition(SyncState::Persisting);
        if let Some(ceiling) = &ceiling {
            self.persist(ceiling)?;
        }

        Ok(CycleReport {
            mode: SyncMode::Full,
            previous: None,
            persisted: ceiling,
            changed: 0,
            pages: stats.pages,
            documents: stats.documents,
            rejected: stats.rejected,
        })
    }

    async fn incremental_load(&mut self, previous: Watermark) -> Result<CycleReport, SyncError> {
        self.transition(SyncState::IncrementalLoad);

        let changes = self.source.changed_since(&previous).await?;
        if changes.is_empty() {
            info!("No changes after {}", previous);
            self.transition(SyncState::Persisting);
            self.persist(&previous)?;
            return Ok(CycleReport {
                mode: SyncMode::Incremental,
                previous: Some(previous.clone()),
                persisted: Some(previous),
                changed: 0,
                pages: 0,
                documents: 0,
                rejected: 0,
            });
        }

        info!("{} films changed after {}", changes.len(), previous);
        self.source.select_by_ids(&changes.ids()).await?;
        let stats = self.load_batches().await?;

        self.transition(SyncState::Persisting);
        let next = match changes.max_modified() {
            Some(latest) if latest > previous => latest,
            _ => previous.clone(),
        };
        self.persist(&next)?;

        Ok(CycleReport {
            mode: SyncMode::Incremental,
            previous: Some(previous),
            persisted: Some(next),
            changed: changes.len(),
            pages: stats.pages,
            documents: stats.documents,
            rejected: stats.rejected,
        })
    }

    /// Pump pages from the open scan into the index until the scan is
    /// exhausted.
    async fn load_batches(&mut self) -> Result<LoadStats, SyncError> {
        let mut stats = LoadStats::default();
        loop {
            let page = self.source.next_page(self.settings.batch_size).await?;
            if page.is_empty() {
                break;
            }

            let outcome = self
                .index
                .bulk_upsert(&self.settings.index_name, &page)
                .await?;
            stats.pages += 1;
            stats.documents += page.len();
            stats.rejected += outcome.failed.len();
            info!(
                "Loaded page {}: {} documents ({} rejected)",
                stats.pages,
                page.len(),
                outcome.failed.len()
            );
        }
        Ok(stats)
    }

    fn persist(&self, watermark: &Watermark) -> Result<(), SyncError> {
        self.store.write(watermark)?;
        info!("Watermark persisted: {}", watermark);
        Ok(())
    }

    fn transition(&mut self, next: SyncState) {
        if self.state != next {
            info!("Sync state: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}
