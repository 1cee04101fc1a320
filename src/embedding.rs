//! OpenAI-compatible embedding client.
//!
//! Sends one `POST {base_url}/embeddings` request per call with the whole
//! batch as `input`. Works against the OpenAI API and any service that
//! speaks the same wire format (Azure OpenAI deployments, local gateways).
//!
//! This client does not retry. Status codes are classified with
//! [`classify_status`] and the engine's retry layer decides what happens
//! next:
//! - HTTP 429 → transient, rate limited (retry hint from headers)
//! - HTTP 408/409/423/425 and 5xx → transient
//! - HTTP 401/403/404 → fatal
//! - other 4xx → permanent
//! - network errors → transient

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{
    classify_status, classify_transport, retry_after_from_headers, Endpoint, SyncError,
};
use crate::remote::Embedder;

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    api_key_header: bool,
}

impl OpenAiEmbedder {
    /// Build a client from config, reading the key from `api_key_env`.
    ///
    /// A missing key is allowed; requests are then sent without auth.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build embedding HTTP client")?;

        Ok(Self {
            client,
            url: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            api_key_header: config.api_key_header,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SyncError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = if self.api_key_header {
                request.header("api-key", key)
            } else {
                request.bearer_auth(key)
            };
        }

        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        let status = response.status();
        let retry_after = retry_after_from_headers(response.headers());
        let text = response.text().await.map_err(|e| classify_transport(&e))?;

        if !status.is_success() {
            return Err(classify_status(
                Endpoint::Embedding,
                status.as_u16(),
                retry_after,
                &text,
            ));
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| SyncError::Permanent(format!("invalid embeddings response: {}", e)))?;
        let vectors = parse_embeddings_response(&json).map_err(SyncError::Permanent)?;

        if vectors.len() != texts.len() {
            return Err(SyncError::Permanent(format!(
                "embedding count mismatch: sent {}, received {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

/// Parse `data[].embedding`, ordered by each item's `index` field.
///
/// Every index must be unique and below the item count, and every element
/// must be a number.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| "invalid embeddings response: missing data array".to_string())?;

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; data.len()];
    for (pos, item) in data.iter().enumerate() {
        let index = match item.get("index") {
            None => pos,
            Some(raw) => raw.as_u64().map(|i| i as usize).ok_or_else(|| {
                format!("invalid embeddings response: item {} has a non-integer index", pos)
            })?,
        };
        if index >= slots.len() {
            return Err(format!(
                "invalid embeddings response: index {} out of range for {} items",
                index,
                slots.len()
            ));
        }
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| format!("invalid embeddings response: item {} has no embedding", pos))?;
        let vector = embedding
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| {
                format!("invalid embeddings response: item {} has a non-numeric element", pos)
            })?;
        if slots[index].replace(vector).is_some() {
            return Err(format!("invalid embeddings response: duplicate index {}", index));
        }
    }

    // Unique indexes below the count fill every slot.
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reorders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.3, 0.4] },
                { "index": 0, "embedding": [0.1, 0.2] }
            ]
        });
        let vectors = parse_embeddings_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[test]
    fn test_parse_without_index_keeps_order() {
        let json = serde_json::json!({
            "data": [ { "embedding": [1.0] }, { "embedding": [2.0] } ]
        });
        let vectors = parse_embeddings_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_parse_rejects_missing_data() {
        let err = parse_embeddings_response(&serde_json::json!({ "error": "x" })).unwrap_err();
        assert!(err.contains("missing data array"));
    }

    #[test]
    fn test_parse_rejects_non_numeric_elements() {
        let json = serde_json::json!({
            "data": [ { "index": 0, "embedding": [0.1, "x", null] } ]
        });
        let err = parse_embeddings_response(&json).unwrap_err();
        assert!(err.contains("non-numeric"), "{}", err);
    }

    #[test]
    fn test_parse_rejects_duplicate_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 0, "embedding": [0.1] },
                { "index": 0, "embedding": [0.2] }
            ]
        });
        let err = parse_embeddings_response(&json).unwrap_err();
        assert!(err.contains("duplicate index 0"), "{}", err);
    }

    #[test]
    fn test_parse_rejects_out_of_range_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 0, "embedding": [0.1] },
                { "index": 5, "embedding": [0.2] }
            ]
        });
        let err = parse_embeddings_response(&json).unwrap_err();
        assert!(err.contains("out of range"), "{}", err);
    }

    #[test]
    fn test_url_joins_base() {
        let config = EmbeddingConfig {
            base_url: "http://localhost:9000/v1/".to_string(),
            model: "m".to_string(),
            timeout_secs: 5,
            api_key_env: "UNUSED".to_string(),
            api_key_header: false,
        };
        let embedder = OpenAiEmbedder::with_api_key(&config, None).unwrap();
        assert_eq!(embedder.url, "http://localhost:9000/v1/embeddings");
        assert_eq!(embedder.model_name(), "m");
    }
}
