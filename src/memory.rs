//! In-process [`RemoteIndex`] and [`Embedder`] implementations.
//!
//! Test doubles for the unit and integration tests; no `isync` command
//! builds them.
//!
//! The index keeps documents in a `BTreeMap` behind a `std::sync::RwLock`
//! and pages its projection by key order; the embedder derives vectors
//! from a hash of the text, so equal texts always embed equally.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use index_sync_core::models::{Chunk, RemoteRecord};

use crate::error::SyncError;
use crate::remote::{Embedder, IndexRecord, ProjectionPage, RejectedRecord, RemoteIndex};

#[derive(Debug, Clone)]
struct StoredDoc {
    fingerprint: String,
    chunk: Option<Chunk>,
    embedding: Vec<f32>,
}

/// In-memory search index.
#[derive(Debug)]
pub struct InMemoryIndex {
    docs: RwLock<BTreeMap<String, StoredDoc>>,
    page_size: usize,
}

impl InMemoryIndex {
    pub fn new(page_size: usize) -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Store a bare `(chunk_id, fingerprint)` entry without a body.
    pub fn seed(&self, chunk_id: &str, fingerprint: &str) {
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                chunk_id.to_string(),
                StoredDoc {
                    fingerprint: fingerprint.to_string(),
                    chunk: None,
                    embedding: Vec::new(),
                },
            );
    }

    /// Current `chunk_id → fingerprint` map.
    pub fn fingerprints(&self) -> BTreeMap<String, String> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, doc)| (id.clone(), doc.fingerprint.clone()))
            .collect()
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<Chunk> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chunk_id)
            .and_then(|doc| doc.chunk.clone())
    }

    pub fn embedding(&self, chunk_id: &str) -> Option<Vec<f32>> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chunk_id)
            .map(|doc| doc.embedding.clone())
    }

    pub fn len(&self) -> usize {
        self.docs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl RemoteIndex for InMemoryIndex {
    async fn list_projection(
        &self,
        page_token: Option<&str>,
    ) -> Result<ProjectionPage, SyncError> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        let mut remaining = docs
            .iter()
            .filter(|(id, _)| page_token.map_or(true, |after| id.as_str() > after));

        let entries: Vec<RemoteRecord> = remaining
            .by_ref()
            .take(self.page_size)
            .map(|(id, doc)| RemoteRecord {
                chunk_id: id.clone(),
                fingerprint: doc.fingerprint.clone(),
            })
            .collect();

        let next_page_token = if remaining.next().is_some() {
            entries.last().map(|e| e.chunk_id.clone())
        } else {
            None
        };

        Ok(ProjectionPage {
            entries,
            next_page_token,
        })
    }

    async fn upsert(&self, records: &[IndexRecord]) -> Result<Vec<RejectedRecord>, SyncError> {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let mut rejected = Vec::new();
        for record in records {
            if record.embedding.is_empty() {
                rejected.push(RejectedRecord {
                    chunk_id: record.chunk_id().to_string(),
                    reason: "document has no embedding".to_string(),
                });
                continue;
            }
            docs.insert(
                record.chunk_id().to_string(),
                StoredDoc {
                    fingerprint: record.fingerprint.clone(),
                    chunk: Some(record.chunk.clone()),
                    embedding: record.embedding.clone(),
                },
            );
        }
        Ok(rejected)
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), SyncError> {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        for id in chunk_ids {
            docs.remove(id);
        }
        Ok(())
    }

    async fn recreate(&self) -> Result<(), SyncError> {
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// Deterministic embedder producing `dims`-dimensional unit-range vectors.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        (0..self.dims)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                i.hash(&mut hasher);
                (hasher.finish() % 2001) as f32 / 1000.0 - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SyncError> {
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(SyncError::Permanent(format!(
                "input {} is empty and cannot be embedded",
                pos
            )));
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index_sync_core::models::ChunkMetadata;

    fn record(id: &str, fp: &str) -> IndexRecord {
        IndexRecord {
            chunk: Chunk {
                chunk_id: id.to_string(),
                text: format!("body of {}", id),
                metadata: ChunkMetadata::default(),
            },
            fingerprint: fp.to_string(),
            embedding: vec![0.5, -0.5],
        }
    }

    #[tokio::test]
    async fn test_projection_pages_in_key_order() {
        let index = InMemoryIndex::new(2);
        for id in ["c", "a", "e", "b", "d"] {
            index.seed(id, &format!("fp-{}", id));
        }

        let mut token: Option<String> = None;
        let mut pages = Vec::new();
        loop {
            let page = index.list_projection(token.as_deref()).await.unwrap();
            pages.push(
                page.entries
                    .iter()
                    .map(|e| e.chunk_id.clone())
                    .collect::<Vec<_>>(),
            );
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(pages, vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_page() {
        let index = InMemoryIndex::new(2);
        index.seed("a", "1");
        index.seed("b", "2");
        let page = index.list_projection(None).await.unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.next_page_token, None);
    }

    #[tokio::test]
    async fn test_upsert_rejects_missing_embedding() {
        let index = InMemoryIndex::default();
        let mut bad = record("b", "2");
        bad.embedding.clear();
        let rejected = index.upsert(&[record("a", "1"), bad]).await.unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].chunk_id, "b");
        assert_eq!(index.len(), 1);
        assert_eq!(index.chunk("a").unwrap().text, "body of a");
    }

    #[tokio::test]
    async fn test_delete_and_recreate() {
        let index = InMemoryIndex::default();
        index.upsert(&[record("a", "1"), record("b", "2")]).await.unwrap();
        index
            .delete(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(index.fingerprints().keys().collect::<Vec<_>>(), vec!["b"]);

        index.recreate().await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(8);
        let texts = vec!["alpha".to_string(), "beta".to_string(), "alpha".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);
        assert!(vectors[0].iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[tokio::test]
    async fn test_hash_embedder_rejects_empty_text() {
        let embedder = HashEmbedder::new(4);
        let err = embedder
            .embed(&["ok".to_string(), "  ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Permanent(_)));
    }
}
