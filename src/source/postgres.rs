//! Postgres-backed catalog source.

use super::models::{ChangeSet, ChangedFilm, FilmDocument, PersonRef};
use super::queries;
use super::{CatalogSource, SourceError};
use crate::error::Transient;
use crate::retry::{Backoff, BackoffPolicy};
use crate::watermark::Watermark;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DB_RETRY_CONTEXT: &str = "DB connection error.";

type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Connection settings for the catalog database.
#[derive(Debug, Clone, PartialEq)]
pub struct PgSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub connect_timeout: Duration,
}

impl PgSettings {
    fn to_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .connect_timeout(self.connect_timeout)
            .application_name("catalog-search-sync");
        if let Some(password) = &self.password {
            config.password(password);
        }
        config
    }
}

#[derive(Debug, Clone)]
enum ScanQuery {
    All,
    ByIds(Vec<Uuid>),
}

#[derive(Debug)]
struct OpenScan {
    query: ScanQuery,
    /// False until the cursor exists on the current connection.
    declared: bool,
    fetched: usize,
}

/// Catalog source reading the `content` schema of the movies database.
///
/// The connection is opened lazily and reopened after a transient failure.
/// Dropping the source closes the connection.
pub struct PgCatalogSource {
    settings: PgSettings,
    backoff: BackoffPolicy,
    client: Option<Client>,
    connection_task: Option<JoinHandle<()>>,
    scan: Option<OpenScan>,
}

impl PgCatalogSource {
    /// Connect to the database, retrying while it is unreachable.
    pub async fn connect(settings: PgSettings, backoff: BackoffPolicy) -> Result<Self, SourceError> {
        let mut source = Self {
            settings,
            backoff,
            client: None,
            connection_task: None,
            scan: None,
        };
        source
            .with_retry(|s| Box::pin(async move { s.client().await.map(|_| ()) }))
            .await?;
        info!(
            "Connected to Postgres at {}:{}/{}",
            source.settings.host, source.settings.port, source.settings.dbname
        );
        Ok(source)
    }

    /// Current client, connecting first if needed.
    async fn client(&mut self) -> Result<&Client, SourceError> {
        if self.client.is_none() {
            let (client, connection) = self
                .settings
                .to_config()
                .connect(NoTls)
                .await
                .map_err(|e| SourceError::database("connecting", e))?;

            self.connection_task = Some(tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!("Postgres connection closed with error: {}", e);
                }
            }));
            self.client = Some(client);
        }

        self.client.as_ref().ok_or(SourceError::NotConnected)
    }

    /// Forget the connection after a transient failure. An open scan is
    /// re-declared from its first row on the next connection.
    fn drop_connection(&mut self) {
        self.client = None;
        if let Some(task) = self.connection_task.take() {
            task.abort();
        }
        if let Some(scan) = self.scan.as_mut() {
            if scan.declared {
                warn!(
                    "Connection lost after {} rows, film scan will restart from the first row",
                    scan.fetched
                );
            }
            scan.declared = false;
            scan.fetched = 0;
        }
    }

    async fn with_retry<T, F>(&mut self, mut op: F) -> Result<T, SourceError>
    where
        F: for<'c> FnMut(&'c mut Self) -> SourceFuture<'c, T>,
    {
        let policy = self.backoff.clone();
        let mut backoff = Backoff::new(&policy, DB_RETRY_CONTEXT);
        loop {
            match op(self).await {
                Ok(value) => {
                    backoff.on_success();
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = err.is_transient();
                    if retryable {
                        self.drop_connection();
                    }
                    backoff.on_error(err, retryable).await?;
                }
            }
        }
    }

    async fn try_last_change_time(&mut self) -> Result<Option<Watermark>, SourceError> {
        let client = self.client().await?;
        let row = client
            .query_one(queries::LAST_MODIFIED, &[])
            .await
            .map_err(|e| SourceError::database("reading last change time", e))?;
        let modified: Option<DateTime<Utc>> = row
            .try_get("modified")
            .map_err(|e| SourceError::database("reading last change time", e))?;
        Ok(modified.map(Watermark::from_instant))
    }

    async fn try_changed_since(&mut self, since: DateTime<Utc>) -> Result<ChangeSet, SourceError> {
        let client = self.client().await?;
        let rows = client
            .query(queries::FILMS_TO_UPDATE, &[&since])
            .await
            .map_err(|e| SourceError::database("listing changed films", e))?;

        let films = rows
            .iter()
            .map(|row| -> Result<ChangedFilm, tokio_postgres::Error> {
                Ok(ChangedFilm {
                    id: row.try_get("id")?,
                    modified: row.try_get("modified")?,
                })
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()
            .map_err(|e| SourceError::database("listing changed films", e))?;

        Ok(ChangeSet::new(films))
    }

    /// Close a cursor left open by a previous scan. Only reached when the
    /// caller abandons a scan before exhausting it.
    async fn close_open_scan(&mut self) -> Result<(), SourceError> {
        let declared = self.scan.as_ref().map(|s| s.declared).unwrap_or(false);
        self.scan = None;
        if declared {
            let client = self.client().await?;
            client
                .batch_execute(&format!("{}; COMMIT", queries::close_cursor()))
                .await
                .map_err(|e| SourceError::database("closing film scan", e))?;
        }
        Ok(())
    }

    async fn declare_scan(&mut self) -> Result<(), SourceError> {
        let query = match self.scan.as_ref() {
            Some(scan) if scan.declared => return Ok(()),
            Some(scan) => scan.query.clone(),
            None => return Err(SourceError::NoOpenScan),
        };

        let client = self.client().await?;
        client
            .batch_execute("BEGIN READ ONLY")
            .await
            .map_err(|e| SourceError::database("opening film scan", e))?;

        let declared = match &query {
            ScanQuery::All => {
                client
                    .batch_execute(&queries::declare_cursor(&queries::select_all()))
                    .await
            }
            ScanQuery::ByIds(ids) => client
                .execute(&queries::declare_cursor(&queries::select_by_ids()), &[ids])
                .await
                .map(|_| ()),
        };
        declared.map_err(|e| SourceError::database("opening film scan", e))?;

        if let Some(scan) = self.scan.as_mut() {
            scan.declared = true;
            scan.fetched = 0;
        }
        debug!("Declared film scan cursor for {:?}", scan_label(&query));
        Ok(())
    }

    async fn try_next_page(&mut self, page_size: usize) -> Result<Vec<FilmDocument>, SourceError> {
        self.declare_scan().await?;

        let client = self.client().await?;
        let rows = client
            .query(&queries::fetch_forward(page_size), &[])
            .await
            .map_err(|e| SourceError::database("fetching films", e))?;

        if rows.is_empty() {
            client
                .batch_execute(&format!("{}; COMMIT", queries::close_cursor()))
                .await
                .map_err(|e| SourceError::database("closing film scan", e))?;
            let fetched = self.scan.take().map(|s| s.fetched).unwrap_or(0);
            debug!("Film scan exhausted after {} rows", fetched);
            return Ok(Vec::new());
        }

        let documents = rows
            .iter()
            .map(film_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(scan) = self.scan.as_mut() {
            scan.fetched += documents.len();
        }
        Ok(documents)
    }

    async fn open_scan(&mut self, query: ScanQuery) -> Result<(), SourceError> {
        if self.scan.is_some() {
            self.with_retry(|s| Box::pin(s.close_open_scan())).await?;
        }
        self.scan = Some(OpenScan {
            query,
            declared: false,
            fetched: 0,
        });
        self.with_retry(|s| Box::pin(s.declare_scan())).await
    }
}

#[async_trait]
impl CatalogSource for PgCatalogSource {
    async fn last_change_time(&mut self) -> Result<Option<Watermark>, SourceError> {
        self.with_retry(|s| Box::pin(s.try_last_change_time()))
            .await
    }

    async fn changed_since(&mut self, watermark: &Watermark) -> Result<ChangeSet, SourceError> {
        let since = watermark.instant();
        self.with_retry(|s| Box::pin(s.try_changed_since(since)))
            .await
    }

    async fn select_all(&mut self) -> Result<(), SourceError> {
        self.open_scan(ScanQuery::All).await
    }

    async fn select_by_ids(&mut self, ids: &[Uuid]) -> Result<(), SourceError> {
        self.open_scan(ScanQuery::ByIds(ids.to_vec())).await
    }

    async fn next_page(&mut self, page_size: usize) -> Result<Vec<FilmDocument>, SourceError> {
        if self.scan.is_none() {
            return Err(SourceError::NoOpenScan);
        }
        self.with_retry(|s| Box::pin(s.try_next_page(page_size)))
            .await
    }
}

fn scan_label(query: &ScanQuery) -> String {
    match query {
        ScanQuery::All => "all films".to_string(),
        ScanQuery::ByIds(ids) => format!("{} films", ids.len()),
    }
}

/// Map a row of the film document query.
fn film_from_row(row: &Row) -> Result<FilmDocument, SourceError> {
    let read = |e| SourceError::database("decoding film row", e);

    let id: Uuid = row.try_get("id").map_err(read)?;
    let genre: Vec<Option<String>> = row.try_get("genre").map_err(read)?;
    let director: Vec<String> = row.try_get("director").map_err(read)?;
    let actors_names: Vec<String> = row.try_get("actors_names").map_err(read)?;
    let writers_names: Vec<String> = row.try_get("writers_names").map_err(read)?;
    let actors: serde_json::Value = row.try_get("actors").map_err(read)?;
    let writers: serde_json::Value = row.try_get("writers").map_err(read)?;

    Ok(FilmDocument {
        id,
        imdb_rating: row.try_get("imdb_rating").map_err(read)?,
        // LEFT JOIN without genres aggregates to {NULL}
        genre: genre.into_iter().flatten().collect(),
        title: row.try_get("title").map_err(read)?,
        description: row.try_get("description").map_err(read)?,
        director,
        actors_names,
        writers_names,
        actors: persons_from_json(id, actors)?,
        writers: persons_from_json(id, writers)?,
    })
}

fn persons_from_json(film_id: Uuid, value: serde_json::Value) -> Result<Vec<PersonRef>, SourceError> {
    serde_json::from_value(value).map_err(|source| SourceError::Decode { film_id, source })
}
