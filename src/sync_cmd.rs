//! `isync sync`, `isync plan` and `isync init-index` commands.
//!
//! Wires the configured HTTP collaborators into a [`SyncEngine`], runs it,
//! and prints the report to stdout (text or JSON). Progress and logs go to
//! stderr.
//!
//! A real `sync` first creates or updates the index definition, so the
//! first run against a fresh service needs no separate `init-index`.

use anyhow::{Context, Result};
use index_sync_core::report::RunReport;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::Config;
use crate::corpus::load_corpus;
use crate::embedding::OpenAiEmbedder;
use crate::engine::{EngineSettings, SyncEngine, SyncOptions};
use crate::progress::ProgressMode;
use crate::retry::{with_retry, RetryPolicy};
use crate::search_service::SearchServiceIndex;

/// HTTP timeout for index requests when the per-attempt timeout is off.
const DEFAULT_INDEX_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SyncArgs {
    pub dry_run: bool,
    pub recreate: bool,
    pub max_concurrency: Option<usize>,
    pub batch_size: Option<usize>,
    pub corpus: Option<PathBuf>,
    pub json: bool,
    /// Print every planned action after the summary (dry runs only).
    pub list_actions: bool,
    pub progress: ProgressMode,
}

fn search_index(cfg: &Config) -> Result<SearchServiceIndex> {
    let timeout = cfg.retry.attempt_timeout().unwrap_or(DEFAULT_INDEX_TIMEOUT);
    let index = SearchServiceIndex::new(&cfg.index, timeout)?;
    if std::env::var(&cfg.index.api_key_env).is_err() {
        warn!(
            env = %cfg.index.api_key_env,
            "no index api key in environment, sending unauthenticated requests"
        );
    }
    Ok(index)
}

pub async fn run_sync(cfg: &Config, args: &SyncArgs) -> Result<RunReport> {
    let corpus_path = args.corpus.clone().unwrap_or_else(|| cfg.corpus.path.clone());
    let chunks = load_corpus(&corpus_path)?;

    let index = search_index(cfg)?;
    let embedder = OpenAiEmbedder::new(&cfg.embedding)?;

    // Recreate issues its own PUT; dry runs never write.
    if !args.dry_run && !args.recreate {
        let policy = RetryPolicy::from_config(&cfg.retry);
        with_retry("ensure_index", &policy, None, || index.ensure_index())
            .await
            .with_context(|| format!("failed to create index '{}'", cfg.index.name))?;
    }

    let engine = SyncEngine::new(
        Arc::new(index),
        Arc::new(embedder),
        EngineSettings::from_config(cfg),
    )
    .with_progress(Arc::from(args.progress.reporter()));

    let mut options = SyncOptions::from_config(cfg);
    options.dry_run = args.dry_run;
    options.recreate = args.recreate;
    if let Some(n) = args.max_concurrency {
        options.max_concurrency = n.max(1);
    }
    if let Some(n) = args.batch_size {
        options.batch_size = n.max(1);
    }

    let report = engine
        .run(&chunks, &options)
        .await
        .with_context(|| format!("sync of index '{}' failed", cfg.index.name))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
        if args.list_actions && !report.planned.is_empty() {
            println!("  actions:");
            for entry in &report.planned {
                println!("    {:<8} {}", entry.action.as_str(), entry.chunk_id);
            }
        }
    }

    Ok(report)
}

pub async fn run_init_index(cfg: &Config) -> Result<()> {
    let index = search_index(cfg)?;
    index
        .ensure_index()
        .await
        .with_context(|| format!("failed to create index '{}'", cfg.index.name))?;
    println!("index {} ready", index.name());
    Ok(())
}
