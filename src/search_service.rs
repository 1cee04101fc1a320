//! Azure AI Search REST client implementing [`RemoteIndex`].
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | projection page | `POST /indexes/{name}/docs/search` selecting `chunk_id,content_hash` |
//! | upsert | `POST /indexes/{name}/docs/index` with `mergeOrUpload` actions |
//! | delete | `POST /indexes/{name}/docs/index` with `delete` actions |
//! | recreate | `DELETE /indexes/{name}` then `PUT /indexes/{name}` |
//!
//! All requests carry `api-version` and the admin key in the `api-key`
//! header.
//!
//! # Paging
//!
//! The projection is paged with `top`/`skip`, ordered by `chunk_id`. The
//! page token is the decimal `skip` of the next page; a page shorter than
//! `page_size` is the last one.
//!
//! # Batch results
//!
//! The index endpoint answers 200 or 207 with a per-document `status`. If
//! any document failed with a retryable status (408, 409, 423, 425, 429 or
//! 5xx) the whole batch is reported as transient and retried;
//! `mergeOrUpload` and `delete` are idempotent, so resending documents
//! that already succeeded is harmless. Otherwise failed documents are
//! returned as [`RejectedRecord`]s.
//!
//! Only the fields in the index schema are sent. `metadata.extra` still
//! participates in the fingerprint but is not stored by this index.

use anyhow::{Context, Result};
use async_trait::async_trait;
use index_sync_core::models::RemoteRecord;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::IndexConfig;
use crate::error::{
    classify_status, classify_transport, retry_after_from_headers, Endpoint, SyncError,
};
use crate::remote::{IndexRecord, ProjectionPage, RejectedRecord, RemoteIndex};

const KEY_FIELD: &str = "chunk_id";
const FINGERPRINT_FIELD: &str = "content_hash";
const VECTOR_FIELD: &str = "content_vector";

pub struct SearchServiceIndex {
    client: reqwest::Client,
    endpoint: String,
    name: String,
    api_version: String,
    api_key: Option<String>,
    page_size: usize,
    vector_dims: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<ProjectionHit>,
}

#[derive(Debug, Deserialize)]
struct ProjectionHit {
    #[serde(default)]
    chunk_id: Option<String>,
    #[serde(default)]
    content_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    value: Vec<IndexingResult>,
}

#[derive(Debug, Deserialize)]
struct IndexingResult {
    key: String,
    status: bool,
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
    #[serde(default, rename = "statusCode")]
    status_code: u16,
}

impl SearchServiceIndex {
    /// Build a client from config, reading the admin key from `api_key_env`.
    pub fn new(config: &IndexConfig, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key, timeout)
    }

    pub fn with_api_key(
        config: &IndexConfig,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build search service HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            name: config.name.clone(),
            api_version: config.api_version.clone(),
            api_key,
            page_size: config.page_size.max(1),
            vector_dims: config.vector_dims,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/indexes/{}{}?api-version={}",
            self.endpoint, self.name, path, self.api_version
        )
    }

    /// Send a request and return the status and body of a successful
    /// response. Error statuses are classified; `allow` lists statuses
    /// that should be returned instead of classified.
    async fn send(
        &self,
        method: Method,
        url: String,
        body: Option<&Value>,
        allow: &[StatusCode],
    ) -> Result<(StatusCode, String), SyncError> {
        let mut request = self.client.request(method, &url);
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        let status = response.status();
        let retry_after = retry_after_from_headers(response.headers());
        let text = response.text().await.map_err(|e| classify_transport(&e))?;

        if status.is_success() || allow.contains(&status) {
            Ok((status, text))
        } else {
            Err(classify_status(
                Endpoint::Index,
                status.as_u16(),
                retry_after,
                &text,
            ))
        }
    }

    /// Post a batch of index actions and collect per-document failures.
    async fn post_actions(&self, actions: Vec<Value>) -> Result<Vec<RejectedRecord>, SyncError> {
        let body = json!({ "value": actions });
        let (_, text) = self
            .send(Method::POST, self.url("/docs/index"), Some(&body), &[])
            .await?;
        let parsed: IndexResponse = serde_json::from_str(&text)
            .map_err(|e| SyncError::Permanent(format!("invalid index response: {}", e)))?;

        let failures: Vec<&IndexingResult> = parsed.value.iter().filter(|r| !r.status).collect();
        if let Some(retryable) = failures.iter().find(|r| is_retryable_item(r.status_code)) {
            return Err(SyncError::Transient {
                reason: format!(
                    "{} of {} documents failed, e.g. {} (HTTP {})",
                    failures.len(),
                    parsed.value.len(),
                    retryable.key,
                    retryable.status_code
                ),
                retry_after: None,
                rate_limited: retryable.status_code == 429,
            });
        }

        Ok(failures
            .into_iter()
            .map(|r| RejectedRecord {
                chunk_id: r.key.clone(),
                reason: match &r.error_message {
                    Some(msg) => format!("HTTP {}: {}", r.status_code, msg),
                    None => format!("HTTP {}", r.status_code),
                },
            })
            .collect())
    }

    /// Create or update the index schema without touching documents.
    pub async fn ensure_index(&self) -> Result<(), SyncError> {
        let schema = self.schema();
        self.send(Method::PUT, self.url(""), Some(&schema), &[])
            .await?;
        Ok(())
    }

    /// Index definition: key, filterable metadata, searchable text fields,
    /// and an HNSW cosine vector field.
    pub fn schema(&self) -> Value {
        let searchable = |name: &str| {
            json!({
                "name": name,
                "type": "Edm.String",
                "searchable": true,
                "analyzer": "en.lucene"
            })
        };
        json!({
            "name": self.name,
            "fields": [
                { "name": KEY_FIELD, "type": "Edm.String", "key": true, "filterable": true, "sortable": true },
                { "name": "doc_path", "type": "Edm.String", "filterable": true },
                { "name": FINGERPRINT_FIELD, "type": "Edm.String", "filterable": true },
                searchable("title"),
                searchable("section_heading"),
                searchable("description"),
                searchable("content"),
                {
                    "name": VECTOR_FIELD,
                    "type": "Collection(Edm.Single)",
                    "searchable": true,
                    "dimensions": self.vector_dims,
                    "vectorSearchProfile": "hnsw-profile"
                }
            ],
            "vectorSearch": {
                "algorithms": [
                    { "name": "hnsw-algorithm", "kind": "hnsw", "hnswParameters": { "metric": "cosine" } }
                ],
                "profiles": [
                    { "name": "hnsw-profile", "algorithm": "hnsw-algorithm" }
                ]
            },
            "semantic": {
                "configurations": [{
                    "name": format!("{}-semantic", self.name),
                    "prioritizedFields": {
                        "titleField": { "fieldName": "title" },
                        "prioritizedContentFields": [
                            { "fieldName": "section_heading" },
                            { "fieldName": "content" }
                        ],
                        "prioritizedKeywordsFields": [ { "fieldName": "description" } ]
                    }
                }]
            }
        })
    }
}

fn is_retryable_item(status: u16) -> bool {
    matches!(status, 408 | 409 | 423 | 425 | 429) || status >= 500
}

fn document(record: &IndexRecord) -> Value {
    let meta = &record.chunk.metadata;
    json!({
        "@search.action": "mergeOrUpload",
        KEY_FIELD: record.chunk.chunk_id,
        "doc_path": meta.doc_path,
        FINGERPRINT_FIELD: record.fingerprint,
        "title": meta.title,
        "section_heading": meta.section_heading,
        "description": meta.description,
        "content": record.chunk.text,
        VECTOR_FIELD: record.embedding,
    })
}

#[async_trait]
impl RemoteIndex for SearchServiceIndex {
    async fn list_projection(
        &self,
        page_token: Option<&str>,
    ) -> Result<ProjectionPage, SyncError> {
        let skip = match page_token {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| SyncError::Fatal(format!("invalid page token {:?}", token)))?,
        };
        let body = json!({
            "search": "*",
            "select": format!("{},{}", KEY_FIELD, FINGERPRINT_FIELD),
            "orderby": format!("{} asc", KEY_FIELD),
            "top": self.page_size,
            "skip": skip,
        });
        let (_, text) = self
            .send(Method::POST, self.url("/docs/search"), Some(&body), &[])
            .await?;
        let parsed: SearchResponse = serde_json::from_str(&text)
            .map_err(|e| SyncError::Permanent(format!("invalid search response: {}", e)))?;

        let returned = parsed.value.len();
        let entries = parsed
            .value
            .into_iter()
            .map(|hit| RemoteRecord {
                chunk_id: hit.chunk_id.unwrap_or_default(),
                fingerprint: hit.content_hash.unwrap_or_default(),
            })
            .collect();

        let next_page_token = (returned >= self.page_size).then(|| (skip + returned).to_string());
        Ok(ProjectionPage {
            entries,
            next_page_token,
        })
    }

    async fn upsert(&self, records: &[IndexRecord]) -> Result<Vec<RejectedRecord>, SyncError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        self.post_actions(records.iter().map(document).collect()).await
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), SyncError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let actions = chunk_ids
            .iter()
            .map(|id| json!({ "@search.action": "delete", KEY_FIELD: id }))
            .collect();
        let rejected = self.post_actions(actions).await?;
        match rejected.first() {
            None => Ok(()),
            Some(first) => Err(SyncError::Permanent(format!(
                "{} deletions rejected, e.g. {}: {}",
                rejected.len(),
                first.chunk_id,
                first.reason
            ))),
        }
    }

    async fn recreate(&self) -> Result<(), SyncError> {
        self.send(Method::DELETE, self.url(""), None, &[StatusCode::NOT_FOUND])
            .await?;
        self.ensure_index().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index_sync_core::models::{Chunk, ChunkMetadata};

    fn index() -> SearchServiceIndex {
        let config = IndexConfig {
            endpoint: "https://search.example.net/".to_string(),
            name: "docs".to_string(),
            api_version: "2024-07-01".to_string(),
            page_size: 1000,
            vector_dims: 3,
            api_key_env: "UNUSED".to_string(),
        };
        SearchServiceIndex::with_api_key(&config, None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_url_layout() {
        assert_eq!(
            index().url("/docs/index"),
            "https://search.example.net/indexes/docs/docs/index?api-version=2024-07-01"
        );
        assert_eq!(
            index().url(""),
            "https://search.example.net/indexes/docs?api-version=2024-07-01"
        );
    }

    #[test]
    fn test_schema_fields() {
        let schema = index().schema();
        let fields = schema["fields"].as_array().unwrap();
        assert_eq!(fields[0]["name"], "chunk_id");
        assert_eq!(fields[0]["key"], true);
        let vector = fields.iter().find(|f| f["name"] == "content_vector").unwrap();
        assert_eq!(vector["dimensions"], 3);
        assert_eq!(
            schema["vectorSearch"]["algorithms"][0]["hnswParameters"]["metric"],
            "cosine"
        );
    }

    #[test]
    fn test_document_shape() {
        let record = IndexRecord {
            chunk: Chunk {
                chunk_id: "abc".to_string(),
                text: "hello".to_string(),
                metadata: ChunkMetadata {
                    doc_path: "guide".to_string(),
                    title: "Guide".to_string(),
                    ..Default::default()
                },
            },
            fingerprint: "fp".to_string(),
            embedding: vec![0.25, 0.5],
        };
        let doc = document(&record);
        assert_eq!(doc["@search.action"], "mergeOrUpload");
        assert_eq!(doc["chunk_id"], "abc");
        assert_eq!(doc["content_hash"], "fp");
        assert_eq!(doc["content"], "hello");
        assert_eq!(doc["content_vector"][1], 0.5);
    }

    #[test]
    fn test_retryable_item_statuses() {
        for status in [409, 429, 500, 503] {
            assert!(is_retryable_item(status));
        }
        for status in [400, 404, 413, 422] {
            assert!(!is_retryable_item(status));
        }
    }
}
