//! Collaborator contracts for the sync engine.
//!
//! The engine never talks HTTP directly. It drives two traits:
//!
//! ```text
//! ┌──────────────┐  embed(texts)          ┌──────────────────┐
//! │              │ ─────────────────────▶ │    Embedder      │
//! │  SyncEngine  │                        └──────────────────┘
//! │  (executor)  │  list_projection /     ┌──────────────────┐
//! │              │  upsert / delete /     │   RemoteIndex    │
//! │              │  recreate ───────────▶ │                  │
//! └──────────────┘                        └──────────────────┘
//! ```
//!
//! Implementations classify their own failures into [`SyncError`] at the
//! point where the raw status is visible; see [`crate::error`]. Built-in
//! implementations:
//!
//! | Trait | Implementation | Module |
//! |-------|----------------|--------|
//! | `RemoteIndex` | Azure AI Search REST API | [`crate::search_service`] |
//! | `RemoteIndex` | in-process map | [`crate::memory`] |
//! | `Embedder` | OpenAI-compatible `/embeddings` | [`crate::embedding`] |
//! | `Embedder` | deterministic hash vectors | [`crate::memory`] |

use async_trait::async_trait;
use index_sync_core::models::{Chunk, RemoteRecord};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

// ═══════════════════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════════════════

/// One page of the remote projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionPage {
    pub entries: Vec<RemoteRecord>,
    /// Opaque continuation token; `None` on the last page.
    pub next_page_token: Option<String>,
}

/// A fully prepared document for the index: chunk, fingerprint, vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub chunk: Chunk,
    pub fingerprint: String,
    pub embedding: Vec<f32>,
}

impl IndexRecord {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk_id
    }
}

/// A document the index refused inside an otherwise accepted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub chunk_id: String,
    pub reason: String,
}

// ═══════════════════════════════════════════════════════════════════════
// RemoteIndex
// ═══════════════════════════════════════════════════════════════════════

/// The search index being synchronized.
#[async_trait]
pub trait RemoteIndex: Send + Sync {
    /// Read one page of `(chunk_id, fingerprint)` pairs.
    ///
    /// Pass `None` for the first page and the returned
    /// `next_page_token` for each following page. Implementations must
    /// request only the id and fingerprint fields, never chunk bodies.
    async fn list_projection(&self, page_token: Option<&str>)
        -> Result<ProjectionPage, SyncError>;

    /// Insert or replace documents.
    ///
    /// A batch-level failure is returned as `Err`. Documents the index
    /// rejected individually are returned in the `Ok` vector; every other
    /// document in the batch was written.
    async fn upsert(&self, records: &[IndexRecord]) -> Result<Vec<RejectedRecord>, SyncError>;

    /// Remove documents by id. Ids that do not exist are not an error.
    async fn delete(&self, chunk_ids: &[String]) -> Result<(), SyncError>;

    /// Drop every document and recreate an empty index.
    async fn recreate(&self) -> Result<(), SyncError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Embedder
// ═══════════════════════════════════════════════════════════════════════

/// Embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning one vector per input in the same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SyncError>;
}
