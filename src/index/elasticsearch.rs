//! HTTP client for Elasticsearch.
//!
//! Only the handful of endpoints the loader needs are wrapped: cluster info,
//! index existence and creation, and the bulk API.

use super::{BulkFailure, BulkOutcome, IndexError, SearchIndex};
use crate::retry::{retry_transient, BackoffPolicy};
use crate::source::FilmDocument;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

const ES_RETRY_CONTEXT: &str = "Elasticsearch connection error.";
const ALREADY_EXISTS: &str = "resource_already_exists_exception";

/// Subset of the `GET /` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cluster_name: String,
    pub version: ClusterVersion,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterVersion {
    pub number: String,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    error: Option<Value>,
}

/// Elasticsearch client used as the bulk loader's target.
///
/// Every request is retried while the cluster is unreachable or answering
/// 502/503/504.
#[derive(Clone)]
pub struct ElasticsearchClient {
    client: Client,
    base_url: String,
    backoff: BackoffPolicy,
}

impl ElasticsearchClient {
    /// Create a client without contacting the cluster.
    ///
    /// # Arguments
    /// * `base_url` - Cluster URL (e.g., "http://127.0.0.1:9200")
    /// * `timeout` - Per-request timeout
    /// * `backoff` - Delays between attempts while the cluster is unavailable
    pub fn new(base_url: &str, timeout: Duration, backoff: BackoffPolicy) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::http("building the HTTP client", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            backoff,
        })
    }

    /// Create a client and wait until the cluster answers.
    pub async fn connect(
        base_url: &str,
        timeout: Duration,
        backoff: BackoffPolicy,
    ) -> Result<Self, IndexError> {
        let client = Self::new(base_url, timeout, backoff)?;
        let info = client.cluster_info().await?;
        info!(
            "Connected to Elasticsearch {} (cluster {}, node {}) at {}",
            info.version.number, info.cluster_name, info.name, client.base_url
        );
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn cluster_info(&self) -> Result<ClusterInfo, IndexError> {
        retry_transient(&self.backoff, ES_RETRY_CONTEXT, || self.try_cluster_info()).await
    }

    async fn try_cluster_info(&self) -> Result<ClusterInfo, IndexError> {
        const CONTEXT: &str = "reading cluster info";
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .map_err(|e| IndexError::http(CONTEXT, e))?;
        let response = ensure_success(CONTEXT, response).await?;
        response.json().await.map_err(|e| IndexError::http(CONTEXT, e))
    }

    async fn try_index_exists(&self, name: &str) -> Result<bool, IndexError> {
        const CONTEXT: &str = "checking the index";
        let response = self
            .client
            .head(format!("{}/{}", self.base_url, name))
            .send()
            .await
            .map_err(|e| IndexError::http(CONTEXT, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(CONTEXT, response).await?;
        Ok(true)
    }

    async fn try_create_index(&self, name: &str, schema: &Value) -> Result<bool, IndexError> {
        const CONTEXT: &str = "creating the index";
        let response = self
            .client
            .put(format!("{}/{}", self.base_url, name))
            .json(schema)
            .send()
            .await
            .map_err(|e| IndexError::http(CONTEXT, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();
        // Another writer created it between our HEAD and PUT
        if status == StatusCode::BAD_REQUEST && error_type(&body).as_deref() == Some(ALREADY_EXISTS)
        {
            debug!("Index {} was created concurrently", name);
            return Ok(false);
        }
        Err(IndexError::Status {
            context: CONTEXT,
            status,
            body,
        })
    }

    async fn try_bulk(&self, body: &str) -> Result<BulkResponse, IndexError> {
        const CONTEXT: &str = "bulk loading";
        let response = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| IndexError::http(CONTEXT, e))?;
        let response = ensure_success(CONTEXT, response).await?;
        response.json().await.map_err(|e| IndexError::http(CONTEXT, e))
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchClient {
    async fn ensure_index(&self, name: &str, schema: &Value) -> Result<bool, IndexError> {
        let exists =
            retry_transient(&self.backoff, ES_RETRY_CONTEXT, || self.try_index_exists(name))
                .await?;
        if exists {
            debug!("Index {} already exists", name);
            return Ok(false);
        }

        let created = retry_transient(&self.backoff, ES_RETRY_CONTEXT, || {
            self.try_create_index(name, schema)
        })
        .await?;
        if created {
            info!("Created index {}", name);
        }
        Ok(created)
    }

    async fn bulk_upsert(
        &self,
        name: &str,
        documents: &[FilmDocument],
    ) -> Result<BulkOutcome, IndexError> {
        if documents.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let body = bulk_body(name, documents)?;
        let response =
            retry_transient(&self.backoff, ES_RETRY_CONTEXT, || self.try_bulk(&body)).await?;

        let outcome = bulk_outcome(response);
        for failure in &outcome.failed {
            warn!(
                "Document {} rejected by index {} (status {}): {}",
                failure.id, name, failure.status, failure.reason
            );
        }
        debug!(
            "Bulk request to {}: {} indexed, {} rejected",
            name,
            outcome.succeeded,
            outcome.failed.len()
        );
        Ok(outcome)
    }
}

/// Pass 2xx responses through, turn anything else into [`IndexError::Status`].
async fn ensure_success(context: &'static str, response: Response) -> Result<Response, IndexError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(IndexError::Status {
        context,
        status,
        body,
    })
}

/// `error.type` of an Elasticsearch error body.
fn error_type(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("type")?
        .as_str()
        .map(str::to_string)
}

/// NDJSON body with one `index` action per document, keyed by film id.
fn bulk_body(name: &str, documents: &[FilmDocument]) -> Result<String, IndexError> {
    let mut body = String::new();
    for document in documents {
        let id = document.id.to_string();
        let action = json!({ "index": { "_index": name, "_id": id } });
        let source = serde_json::to_string(document)
            .map_err(|source| IndexError::Encode { id, source })?;
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

fn bulk_outcome(response: BulkResponse) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for entry in response.items {
        // Each item is keyed by its action name
        let raw = entry.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
        let item = match serde_json::from_value::<BulkItem>(raw.clone()) {
            Ok(item) => item,
            Err(e) => {
                outcome.failed.push(BulkFailure {
                    id: raw
                        .get("_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    status: 0,
                    reason: format!("unreadable bulk item ({}): {}", e, raw),
                });
                continue;
            }
        };

        match (item.error, item.status) {
            (None, Some(status)) if (200..300).contains(&status) => outcome.succeeded += 1,
            (error, status) => outcome.failed.push(BulkFailure {
                id: item.id,
                status: status.unwrap_or(0),
                reason: error
                    .map(|e| failure_reason(&e))
                    .unwrap_or_else(|| "no status reported".to_string()),
            }),
        }
    }
    if response.errors && outcome.failed.is_empty() {
        warn!("Bulk response flagged errors but no item carried one");
    }
    outcome
}

fn failure_reason(error: &Value) -> String {
    match (error.get("type"), error.get("reason")) {
        (Some(Value::String(kind)), Some(Value::String(reason))) => format!("{}: {}", kind, reason),
        (_, Some(Value::String(reason))) => reason.clone(),
        _ => error.to_string(),
    }
}
