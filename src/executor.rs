//! Bounded concurrent executor for sync plans.
//!
//! The plan's write actions are cut into work units:
//!
//! - upserts (`New` / `Changed`): up to `batch_size` chunks per unit. A unit
//!   embeds all of its texts in one request, then writes the records in one
//!   upsert. Embedding always finishes before the upsert starts.
//! - deletes: up to `delete_batch_size` ids per unit, one request each.
//!
//! Units run as tasks on a [`JoinSet`], and a [`Semaphore`] with
//! `max_concurrency` permits limits how many are in flight. Every remote
//! call goes through [`with_retry_until`] and the shared [`ThrottleController`].
//!
//! Permanent and exhausted failures are recorded per chunk and never stop
//! the other units. A fatal error cancels the run's [`CancellationToken`]:
//! no further units are dispatched, and units already running stop before
//! their next request (an in-flight request is allowed to complete). The
//! fatal error is returned, not the cancellations it caused.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use index_sync_core::models::{ActionKind, ActionState, Chunk, SyncAction};
use index_sync_core::plan::SyncPlan;
use index_sync_core::report::FailedChunk;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::remote::{Embedder, IndexRecord, RemoteIndex};
use crate::retry::{with_retry_until, RetryPolicy};
use crate::throttle::ThrottleController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub max_concurrency: usize,
    pub batch_size: usize,
    pub delete_batch_size: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            batch_size: 100,
            delete_batch_size: 500,
        }
    }
}

/// What the executor actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub upserted: usize,
    pub removed: usize,
    pub failed: Vec<FailedChunk>,
}

impl ExecutionOutcome {
    fn merge(&mut self, other: ExecutionOutcome) {
        self.upserted += other.upserted;
        self.removed += other.removed;
        self.failed.extend(other.failed);
    }
}

#[derive(Debug, Clone)]
struct UpsertItem {
    chunk: Chunk,
    fingerprint: String,
    kind: ActionKind,
}

#[derive(Debug)]
enum WorkUnit {
    Upsert(Vec<UpsertItem>),
    Delete(Vec<String>),
}

impl WorkUnit {
    fn len(&self) -> usize {
        match self {
            WorkUnit::Upsert(items) => items.len(),
            WorkUnit::Delete(ids) => ids.len(),
        }
    }
}

/// Shared, read-only state of one execution plus the progress counter.
struct UnitContext {
    index: Arc<dyn RemoteIndex>,
    embedder: Arc<dyn Embedder>,
    retry: RetryPolicy,
    throttle: Arc<ThrottleController>,
    progress: Arc<dyn SyncProgressReporter>,
    label: String,
    cancel: CancellationToken,
    done: AtomicU64,
    total: u64,
}

pub struct Executor {
    index: Arc<dyn RemoteIndex>,
    embedder: Arc<dyn Embedder>,
    retry: RetryPolicy,
    throttle: Arc<ThrottleController>,
    progress: Arc<dyn SyncProgressReporter>,
    label: String,
}

impl Executor {
    pub fn new(
        index: Arc<dyn RemoteIndex>,
        embedder: Arc<dyn Embedder>,
        retry: RetryPolicy,
        throttle: Arc<ThrottleController>,
        progress: Arc<dyn SyncProgressReporter>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            index,
            embedder,
            retry,
            throttle,
            progress,
            label: label.into(),
        }
    }

    /// Apply every write action of `plan`.
    pub async fn execute(
        &self,
        plan: &SyncPlan,
        settings: &ExecutorSettings,
    ) -> Result<ExecutionOutcome, SyncError> {
        let mut outcome = ExecutionOutcome::default();
        let (units, unplannable) = build_units(plan, settings);
        outcome.failed.extend(unplannable);

        let ctx = Arc::new(UnitContext {
            index: Arc::clone(&self.index),
            embedder: Arc::clone(&self.embedder),
            retry: self.retry.clone(),
            throttle: Arc::clone(&self.throttle),
            progress: Arc::clone(&self.progress),
            label: self.label.clone(),
            cancel: CancellationToken::new(),
            done: AtomicU64::new(0),
            total: units.iter().map(|u| u.len() as u64).sum(),
        });

        let semaphore = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
        let mut tasks: JoinSet<Result<ExecutionOutcome, SyncError>> = JoinSet::new();
        let mut fatal: Option<SyncError> = None;
        let mut cancelled = false;

        for unit in units {
            let permit = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move {
                let _permit = permit;
                let size = unit.len() as u64;
                let result = match unit {
                    WorkUnit::Upsert(items) => run_upsert_unit(&ctx, items).await,
                    WorkUnit::Delete(ids) => run_delete_unit(&ctx, ids).await,
                };
                match &result {
                    Err(err) if err.is_cancelled() => {
                        debug!(size, "unit stopped by cancellation");
                    }
                    Err(err) => {
                        warn!(error = %err, "fatal error, cancelling remaining work");
                        ctx.cancel.cancel();
                    }
                    Ok(_) => {}
                }
                let done = ctx.done.fetch_add(size, Ordering::SeqCst) + size;
                ctx.progress.report(SyncProgressEvent::Executing {
                    index: ctx.label.clone(),
                    done,
                    total: ctx.total,
                });
                result
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(unit_outcome)) => outcome.merge(unit_outcome),
                Ok(Err(err)) if err.is_cancelled() => cancelled = true,
                Ok(Err(err)) => {
                    fatal.get_or_insert(err);
                }
                Err(join_err) => {
                    ctx.cancel.cancel();
                    fatal.get_or_insert(SyncError::Fatal(format!(
                        "sync worker failed: {}",
                        join_err
                    )));
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        if cancelled {
            return Err(SyncError::Cancelled);
        }
        outcome.failed.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        Ok(outcome)
    }
}

fn build_units(plan: &SyncPlan, settings: &ExecutorSettings) -> (Vec<WorkUnit>, Vec<FailedChunk>) {
    let mut unplannable = Vec::new();
    let mut items = Vec::new();
    for action in plan.upserts() {
        match upsert_item(action) {
            Some(item) => items.push(item),
            None => unplannable.push(FailedChunk {
                chunk_id: action.chunk_id.clone(),
                action: action.kind,
                reason: "action has no chunk payload".to_string(),
            }),
        }
    }
    let delete_ids: Vec<String> = plan.deletes().map(|a| a.chunk_id.clone()).collect();

    let mut units: Vec<WorkUnit> = items
        .chunks(settings.batch_size.max(1))
        .map(|batch| WorkUnit::Upsert(batch.to_vec()))
        .collect();
    units.extend(
        delete_ids
            .chunks(settings.delete_batch_size.max(1))
            .map(|batch| WorkUnit::Delete(batch.to_vec())),
    );
    (units, unplannable)
}

fn upsert_item(action: &SyncAction) -> Option<UpsertItem> {
    Some(UpsertItem {
        chunk: action.chunk.clone()?,
        fingerprint: action.fingerprint.clone()?,
        kind: action.kind,
    })
}

/// One remote call for `chunk_ids` under the run's retry policy, throttle
/// and cancellation. Each retry moves the chunks through `Retrying`.
async fn retry<T, F, Fut>(
    ctx: &UnitContext,
    operation: &str,
    chunk_ids: &[&str],
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0u32;
    with_retry_until(
        operation,
        &ctx.retry,
        Some(ctx.throttle.as_ref()),
        &ctx.cancel,
        |_| {
            for id in chunk_ids {
                transition(id, ActionState::InFlight, ActionState::Retrying);
            }
        },
        || {
            attempt += 1;
            if attempt > 1 {
                for id in chunk_ids {
                    transition(id, ActionState::Retrying, ActionState::InFlight);
                }
            }
            op()
        },
    )
    .await
}

fn transition(chunk_id: &str, from: ActionState, to: ActionState) {
    debug_assert!(from.can_transition_to(to), "{} -> {}", from, to);
    debug!(chunk_id, from = %from, to = %to, "action state");
}

fn failed(chunk_id: &str, kind: ActionKind, reason: String) -> FailedChunk {
    transition(chunk_id, ActionState::InFlight, ActionState::Failed);
    warn!(chunk_id, action = %kind, reason = %reason, "action failed");
    FailedChunk {
        chunk_id: chunk_id.to_string(),
        action: kind,
        reason,
    }
}

async fn run_upsert_unit(
    ctx: &UnitContext,
    items: Vec<UpsertItem>,
) -> Result<ExecutionOutcome, SyncError> {
    let mut outcome = ExecutionOutcome::default();
    for item in &items {
        transition(&item.chunk.chunk_id, ActionState::Pending, ActionState::InFlight);
    }

    let vectors = embed_unit(ctx, &items).await?;

    let mut records = Vec::with_capacity(items.len());
    for (item, vector) in items.iter().zip(vectors) {
        match vector {
            Ok(embedding) => records.push((
                item.kind,
                IndexRecord {
                    chunk: item.chunk.clone(),
                    fingerprint: item.fingerprint.clone(),
                    embedding,
                },
            )),
            Err(err) => outcome.failed.push(failed(
                &item.chunk.chunk_id,
                item.kind,
                format!("embedding failed: {}", err.reason()),
            )),
        }
    }
    if records.is_empty() {
        return Ok(outcome);
    }

    let payload: Vec<IndexRecord> = records.iter().map(|(_, r)| r.clone()).collect();
    let ids: Vec<&str> = payload.iter().map(|r| r.chunk_id()).collect();
    let result = retry(ctx, "upsert", &ids, || ctx.index.upsert(&payload)).await;

    match result {
        Ok(rejected) => {
            for (kind, record) in &records {
                match rejected.iter().find(|r| r.chunk_id == record.chunk_id()) {
                    Some(r) => outcome.failed.push(failed(
                        record.chunk_id(),
                        *kind,
                        format!("rejected by index: {}", r.reason),
                    )),
                    None => {
                        transition(
                            record.chunk_id(),
                            ActionState::InFlight,
                            ActionState::Succeeded,
                        );
                        outcome.upserted += 1;
                    }
                }
            }
        }
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            for (kind, record) in &records {
                outcome.failed.push(failed(
                    record.chunk_id(),
                    *kind,
                    format!("upsert failed: {}", err.reason()),
                ));
            }
        }
    }
    Ok(outcome)
}

/// Embed every item of a unit, one vector (or error) per item.
///
/// A multi-item request that is rejected permanently is retried item by
/// item so only the offending chunk fails. Exhausted requests are not
/// split, since the service itself is struggling.
async fn embed_unit(
    ctx: &UnitContext,
    items: &[UpsertItem],
) -> Result<Vec<Result<Vec<f32>, SyncError>>, SyncError> {
    let texts: Vec<String> = items.iter().map(|i| i.chunk.text.clone()).collect();
    let ids: Vec<&str> = items.iter().map(|i| i.chunk.chunk_id.as_str()).collect();
    let result = retry(ctx, "embed", &ids, || ctx.embedder.embed(&texts)).await;

    let err = match result {
        Ok(vectors) if vectors.len() == texts.len() => {
            return Ok(vectors.into_iter().map(Ok).collect());
        }
        Ok(vectors) => SyncError::Permanent(format!(
            "embedding count mismatch: sent {}, received {}",
            texts.len(),
            vectors.len()
        )),
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => err,
    };

    if texts.len() == 1 || !matches!(err, SyncError::Permanent(_)) {
        return Ok(texts.iter().map(|_| Err(err.clone())).collect());
    }

    debug!(
        size = texts.len(),
        error = %err,
        "embedding batch rejected, embedding chunks one by one"
    );
    let mut vectors = Vec::with_capacity(texts.len());
    for (id, text) in ids.iter().zip(&texts) {
        let single = std::slice::from_ref(text);
        let result = retry(ctx, "embed", &[*id], || ctx.embedder.embed(single)).await;
        match result {
            Ok(mut v) if v.len() == 1 => vectors.push(Ok(v.remove(0))),
            Ok(v) => vectors.push(Err(SyncError::Permanent(format!(
                "embedding count mismatch: sent 1, received {}",
                v.len()
            )))),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => vectors.push(Err(err)),
        }
    }
    Ok(vectors)
}

async fn run_delete_unit(
    ctx: &UnitContext,
    ids: Vec<String>,
) -> Result<ExecutionOutcome, SyncError> {
    let mut outcome = ExecutionOutcome::default();
    for id in &ids {
        transition(id, ActionState::Pending, ActionState::InFlight);
    }

    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let result = retry(ctx, "delete", &id_refs, || ctx.index.delete(&ids)).await;

    match result {
        Ok(()) => {
            for id in &ids {
                transition(id, ActionState::InFlight, ActionState::Succeeded);
            }
            outcome.removed = ids.len();
        }
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            for id in &ids {
                outcome.failed.push(failed(
                    id,
                    ActionKind::Deleted,
                    format!("delete failed: {}", err.reason()),
                ));
            }
        }
    }
    Ok(outcome)
}
