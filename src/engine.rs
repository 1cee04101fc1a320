//! Sync engine entry point.
//!
//! One call to [`SyncEngine::run`] performs a complete sync:
//!
//! ```text
//! chunks ──▶ fingerprint ─┐
//!                         ├──▶ plan ──▶ executor ──▶ RunReport
//! index ──▶ projection ───┘
//! ```
//!
//! - **dry run**: reads the projection and plans, but never embeds, writes,
//!   deletes or recreates anything. The report lists the planned actions.
//! - **recreate**: skips the projection read and plans against an empty
//!   index, so every chunk is `New` and nothing is `Deleted`. Outside a dry
//!   run the index is dropped and recreated before any write.
//!
//! Every run gets its own throttle controller and run id.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use index_sync_core::models::{ActionKind, Chunk};
use index_sync_core::plan::plan_chunks;
use index_sync_core::report::{PlanEntry, RunReport};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::{Config, ThrottleConfig};
use crate::error::SyncError;
use crate::executor::{Executor, ExecutorSettings};
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::projection::fetch_projection;
use crate::remote::{Embedder, RemoteIndex};
use crate::retry::{with_retry, RetryPolicy};
use crate::throttle::ThrottleController;

/// Settings fixed for the lifetime of an engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub retry: RetryPolicy,
    pub throttle: ThrottleConfig,
    pub delete_batch_size: usize,
    /// Index name used in progress output.
    pub label: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            throttle: ThrottleConfig::default(),
            delete_batch_size: 500,
            label: "index".to_string(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.retry),
            throttle: config.throttle.clone(),
            delete_batch_size: config.sync.delete_batch_size,
            label: config.index.name.clone(),
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub recreate: bool,
    pub max_concurrency: usize,
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            recreate: false,
            max_concurrency: 4,
            batch_size: 100,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrency: config.sync.max_concurrency,
            batch_size: config.sync.batch_size,
            ..Self::default()
        }
    }
}

pub struct SyncEngine {
    index: Arc<dyn RemoteIndex>,
    embedder: Arc<dyn Embedder>,
    settings: EngineSettings,
    progress: Arc<dyn SyncProgressReporter>,
}

impl SyncEngine {
    pub fn new(
        index: Arc<dyn RemoteIndex>,
        embedder: Arc<dyn Embedder>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            index,
            embedder,
            settings,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Synchronize the index with `chunks`.
    ///
    /// Per-chunk failures end up in [`RunReport::failed`]; only fatal
    /// errors (bad credentials, missing index, unreadable projection,
    /// invalid corpus) are returned as `Err`.
    pub async fn run(
        &self,
        chunks: &[Chunk],
        options: &SyncOptions,
    ) -> Result<RunReport, SyncError> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("sync", run_id = %run_id, index = %self.settings.label);
        self.run_inner(run_id, chunks, options).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: String,
        chunks: &[Chunk],
        options: &SyncOptions,
    ) -> Result<RunReport, SyncError> {
        let started = Instant::now();
        let throttle = Arc::new(ThrottleController::new(&self.settings.throttle));

        info!(
            chunks = chunks.len(),
            dry_run = options.dry_run,
            recreate = options.recreate,
            "sync started"
        );
        self.progress.report(SyncProgressEvent::Planning {
            index: self.settings.label.clone(),
            local: chunks.len() as u64,
        });

        let remote = if options.recreate {
            BTreeMap::new()
        } else {
            fetch_projection(
                self.index.as_ref(),
                &self.settings.retry,
                Some(throttle.as_ref()),
            )
            .await?
        };

        let plan = plan_chunks(chunks, &remote)
            .map_err(|e| SyncError::Fatal(format!("invalid corpus: {:#}", e)))?;
        let counts = plan.counts();
        let distinct = counts.total() - counts.deleted;
        if distinct < chunks.len() {
            warn!(
                duplicates = chunks.len() - distinct,
                "duplicate chunk ids in corpus, last occurrence wins"
            );
        }
        info!(
            remote = remote.len(),
            new = counts.new,
            changed = counts.changed,
            unchanged = counts.unchanged,
            deleted = counts.deleted,
            "plan ready"
        );

        let mut report = RunReport {
            run_id,
            dry_run: options.dry_run,
            recreate: options.recreate,
            counts,
            ..Default::default()
        };

        if options.dry_run {
            report.planned = plan
                .actions
                .iter()
                .filter(|a| a.kind != ActionKind::Unchanged)
                .map(|a| PlanEntry {
                    chunk_id: a.chunk_id.clone(),
                    action: a.kind,
                })
                .collect();
            report.set_duration(started.elapsed());
            info!("dry run, nothing written");
            return Ok(report);
        }

        if options.recreate {
            info!("recreating index");
            with_retry("recreate", &self.settings.retry, Some(throttle.as_ref()), || {
                self.index.recreate()
            })
            .await
            .map_err(|e| e.into_fatal("recreating index"))?;
        }

        let executor = Executor::new(
            Arc::clone(&self.index),
            Arc::clone(&self.embedder),
            self.settings.retry.clone(),
            Arc::clone(&throttle),
            Arc::clone(&self.progress),
            self.settings.label.clone(),
        );
        let settings = ExecutorSettings {
            max_concurrency: options.max_concurrency,
            batch_size: options.batch_size,
            delete_batch_size: self.settings.delete_batch_size,
        };
        let outcome = executor.execute(&plan, &settings).await?;

        report.upserted = outcome.upserted;
        report.removed = outcome.removed;
        report.failed = outcome.failed;
        report.set_duration(started.elapsed());

        let snapshot = throttle.snapshot();
        info!(
            upserted = report.upserted,
            removed = report.removed,
            failed = report.failed.len(),
            overload_signals = snapshot.overload_signals,
            duration_ms = report.duration_ms,
            "sync finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HashEmbedder, InMemoryIndex};
    use index_sync_core::models::ChunkMetadata;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                doc_path: "docs/page".to_string(),
                ..Default::default()
            },
        }
    }

    fn engine(index: Arc<InMemoryIndex>) -> SyncEngine {
        SyncEngine::new(index, Arc::new(HashEmbedder::new(4)), EngineSettings::default())
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let index = Arc::new(InMemoryIndex::default());
        let chunks = vec![chunk("a", "one"), chunk("b", "two")];
        let engine = engine(Arc::clone(&index));

        let first = engine.run(&chunks, &SyncOptions::default()).await.unwrap();
        assert_eq!(first.counts.new, 2);
        assert_eq!(first.upserted, 2);

        let second = engine.run(&chunks, &SyncOptions::default()).await.unwrap();
        assert_eq!(second.counts.unchanged, 2);
        assert_eq!(second.upserted, 0);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_dry_run_lists_planned_actions() {
        let index = Arc::new(InMemoryIndex::default());
        index.seed("gone", "x");
        let chunks = vec![chunk("a", "one")];
        let options = SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        };

        let report = engine(Arc::clone(&index)).run(&chunks, &options).await.unwrap();
        assert!(report.dry_run);
        let planned: Vec<(&str, ActionKind)> = report
            .planned
            .iter()
            .map(|p| (p.chunk_id.as_str(), p.action))
            .collect();
        assert_eq!(planned, vec![("a", ActionKind::New), ("gone", ActionKind::Deleted)]);
        // Nothing was written.
        assert_eq!(index.fingerprints().keys().collect::<Vec<_>>(), vec!["gone"]);
    }

    #[tokio::test]
    async fn test_empty_chunk_id_is_fatal() {
        let index = Arc::new(InMemoryIndex::default());
        let err = engine(index)
            .run(&[chunk("", "text")], &SyncOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.reason().contains("invalid corpus"));
    }
}
