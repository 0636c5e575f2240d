//! In-memory stand-ins for the catalog database, the watermark file and the
//! search index.
//!
//! Every fake is a cheap handle over shared state: clone it, hand one clone
//! to the synchronizer and keep the other to inspect what happened.

use async_trait::async_trait;
use catalog_search_sync::index::{BulkFailure, BulkOutcome, IndexError, SearchIndex};
use catalog_search_sync::source::{
    CatalogSource, ChangeSet, ChangedFilm, FilmDocument, SourceError,
};
use catalog_search_sync::watermark::{Watermark, WatermarkError, WatermarkStore};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ============================================================================
// Catalog
// ============================================================================

/// A call received by [`FakeCatalog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogCall {
    LastChangeTime,
    ChangedSince(String),
    SelectAll,
    SelectByIds(Vec<Uuid>),
    NextPage(usize),
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    document: FilmDocument,
    modified: DateTime<Utc>,
}

#[derive(Default)]
struct CatalogState {
    films: Vec<CatalogEntry>,
    /// Person or genre changes, keyed by the film they affect
    related_changes: Vec<(Uuid, DateTime<Utc>)>,
    /// Films that appear in the catalog while a full scan is being opened
    arriving_during_scan: Vec<CatalogEntry>,
    calls: Vec<CatalogCall>,
    scan: Option<VecDeque<FilmDocument>>,
    pages_served: usize,
    fail_on_page: Option<usize>,
}

#[derive(Clone, Default)]
pub struct FakeCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_film(self, document: FilmDocument, modified: DateTime<Utc>) -> Self {
        self.add_film(document, modified);
        self
    }

    /// Insert or update a film with its own change time
    pub fn add_film(&self, document: FilmDocument, modified: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        state.films.retain(|e| e.document.id != document.id);
        state.films.push(CatalogEntry { document, modified });
    }

    /// Record a change of a person or genre linked to `film_id`
    pub fn touch_related(&self, film_id: Uuid, modified: DateTime<Utc>) {
        self.state
            .lock()
            .unwrap()
            .related_changes
            .push((film_id, modified));
    }

    /// Make `document` land in the catalog right after the change ceiling
    /// of a full load was read
    pub fn arrive_during_scan(&self, document: FilmDocument, modified: DateTime<Utc>) {
        self.state
            .lock()
            .unwrap()
            .arriving_during_scan
            .push(CatalogEntry { document, modified });
    }

    /// Fail `next_page` with a permanent error on the given (1-based) page
    pub fn fail_on_page(&self, page: usize) {
        self.state.lock().unwrap().fail_on_page = Some(page);
    }

    pub fn calls(&self) -> Vec<CatalogCall> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: CatalogCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn open_scan(state: &mut CatalogState, filter: Option<&[Uuid]>) {
        let mut entries: Vec<&CatalogEntry> = state
            .films
            .iter()
            .filter(|e| filter.map_or(true, |ids| ids.contains(&e.document.id)))
            .collect();
        entries.sort_by_key(|e| (e.modified, e.document.id));
        state.scan = Some(entries.into_iter().map(|e| e.document.clone()).collect());
        state.pages_served = 0;
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn last_change_time(&mut self) -> Result<Option<Watermark>, SourceError> {
        self.record(CatalogCall::LastChangeTime);
        let state = self.state.lock().unwrap();
        let latest = state
            .films
            .iter()
            .map(|e| e.modified)
            .chain(state.related_changes.iter().map(|(_, m)| *m))
            .max();
        Ok(latest.map(Watermark::from_instant))
    }

    async fn changed_since(&mut self, watermark: &Watermark) -> Result<ChangeSet, SourceError> {
        self.record(CatalogCall::ChangedSince(watermark.as_str().to_string()));
        let state = self.state.lock().unwrap();

        let mut latest: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
        let contributions = state
            .films
            .iter()
            .map(|e| (e.document.id, e.modified))
            .chain(state.related_changes.iter().copied());
        for (id, modified) in contributions {
            if modified > watermark.instant() {
                let entry = latest.entry(id).or_insert(modified);
                if modified > *entry {
                    *entry = modified;
                }
            }
        }

        let mut films: Vec<ChangedFilm> = latest
            .into_iter()
            .map(|(id, modified)| ChangedFilm { id, modified })
            .collect();
        films.sort_by_key(|f| (f.modified, f.id));
        Ok(ChangeSet::new(films))
    }

    async fn select_all(&mut self) -> Result<(), SourceError> {
        self.record(CatalogCall::SelectAll);
        let mut state = self.state.lock().unwrap();
        let arriving = std::mem::take(&mut state.arriving_during_scan);
        state.films.extend(arriving);
        Self::open_scan(&mut state, None);
        Ok(())
    }

    async fn select_by_ids(&mut self, ids: &[Uuid]) -> Result<(), SourceError> {
        self.record(CatalogCall::SelectByIds(ids.to_vec()));
        let mut state = self.state.lock().unwrap();
        Self::open_scan(&mut state, Some(ids));
        Ok(())
    }

    async fn next_page(&mut self, page_size: usize) -> Result<Vec<FilmDocument>, SourceError> {
        self.record(CatalogCall::NextPage(page_size));
        let mut state = self.state.lock().unwrap();

        let page_number = state.pages_served + 1;
        if state.fail_on_page == Some(page_number) {
            let film_id = state
                .scan
                .as_ref()
                .and_then(|s| s.front())
                .map(|d| d.id)
                .unwrap_or_else(Uuid::nil);
            let source = serde_json::from_str::<serde_json::Value>("{")
                .expect_err("truncated JSON must not parse");
            return Err(SourceError::Decode { film_id, source });
        }

        let scan = state.scan.as_mut().ok_or(SourceError::NoOpenScan)?;
        let take = page_size.min(scan.len());
        let page: Vec<FilmDocument> = scan.drain(..take).collect();
        if page.is_empty() {
            state.scan = None;
        } else {
            state.pages_served = page_number;
        }
        Ok(page)
    }
}

// ============================================================================
// Watermark store
// ============================================================================

#[derive(Default)]
struct StoreState {
    value: Option<Watermark>,
    writes: usize,
}

#[derive(Clone, Default)]
pub struct MemoryWatermarkStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watermark(text: &str) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().value =
            Some(Watermark::parse(text).expect("Invalid test watermark"));
        store
    }

    pub fn current(&self) -> Option<Watermark> {
        self.state.lock().unwrap().value.clone()
    }

    /// Text of the stored watermark
    pub fn current_text(&self) -> Option<String> {
        self.current().map(|w| w.as_str().to_string())
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn read(&self) -> Result<Option<Watermark>, WatermarkError> {
        Ok(self.current())
    }

    fn write(&self, watermark: &Watermark) -> Result<(), WatermarkError> {
        let mut state = self.state.lock().unwrap();
        state.value = Some(watermark.clone());
        state.writes += 1;
        Ok(())
    }
}

// ============================================================================
// Search index
// ============================================================================

#[derive(Default)]
struct IndexState {
    schemas: HashMap<String, serde_json::Value>,
    documents: HashMap<Uuid, FilmDocument>,
    /// Ids in the order they were upserted, repeats included
    upserts: Vec<Uuid>,
    bulk_requests: usize,
    reject_ids: HashSet<Uuid>,
    fail_on_bulk: Option<usize>,
}

#[derive(Clone, Default)]
pub struct InMemoryIndex {
    state: Arc<Mutex<IndexState>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the document with `id` in every bulk request
    pub fn reject(&self, id: Uuid) {
        self.state.lock().unwrap().reject_ids.insert(id);
    }

    /// Fail the given (1-based) bulk request with a permanent error
    pub fn fail_on_bulk(&self, request: usize) {
        self.state.lock().unwrap().fail_on_bulk = Some(request);
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.state.lock().unwrap().schemas.contains_key(name)
    }

    pub fn document(&self, id: Uuid) -> Option<FilmDocument> {
        self.state.lock().unwrap().documents.get(&id).cloned()
    }

    pub fn document_ids(&self) -> HashSet<Uuid> {
        self.state.lock().unwrap().documents.keys().copied().collect()
    }

    pub fn upserts(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().upserts.clone()
    }

    pub fn bulk_requests(&self) -> usize {
        self.state.lock().unwrap().bulk_requests
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn ensure_index(
        &self,
        name: &str,
        schema: &serde_json::Value,
    ) -> Result<bool, IndexError> {
        let mut state = self.state.lock().unwrap();
        if state.schemas.contains_key(name) {
            return Ok(false);
        }
        state.schemas.insert(name.to_string(), schema.clone());
        Ok(true)
    }

    async fn bulk_upsert(
        &self,
        _name: &str,
        documents: &[FilmDocument],
    ) -> Result<BulkOutcome, IndexError> {
        let mut state = self.state.lock().unwrap();
        state.bulk_requests += 1;
        if state.fail_on_bulk == Some(state.bulk_requests) {
            return Err(IndexError::Status {
                context: "bulk loading",
                status: StatusCode::BAD_REQUEST,
                body: r#"{"error":{"type":"illegal_argument_exception"}}"#.to_string(),
            });
        }

        let mut outcome = BulkOutcome::default();
        for document in documents {
            if state.reject_ids.contains(&document.id) {
                outcome.failed.push(BulkFailure {
                    id: document.id.to_string(),
                    status: 400,
                    reason: "mapper_parsing_exception: rejected by test".to_string(),
                });
                continue;
            }
            state.upserts.push(document.id);
            state.documents.insert(document.id, document.clone());
            outcome.succeeded += 1;
        }
        Ok(outcome)
    }
}
